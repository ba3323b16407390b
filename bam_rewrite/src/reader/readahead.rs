use crate::block::Block;
use crate::util::{decompress_block, fetch_block};

// Fetches BGZF blocks on one thread and inflates them on the rest of the pool.
use flume::{Receiver, Sender};
use std::cmp::{Ord, Ordering, PartialEq, PartialOrd};
use std::collections::BinaryHeap;
use std::io::{self, Read};
use std::sync::Arc;

enum Status {
    Success(Block),
    Failed(io::Error),
    Eof,
}

struct Task(usize, Status);

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        // Smallest go first.
        other.0.cmp(&self.0)
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for Task {}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Prefetches and decompresses BGZF blocks. Blocks come out in stream order
/// whatever order they were inflated in.
pub(crate) struct Readahead {
    used_block_sender: Sender<Block>,
    ready_to_processing_rx: Receiver<Status>,
    finished: bool,
}

impl Readahead {
    pub fn new(thread_num: usize, mut reader: Box<dyn Read + Send + 'static>) -> io::Result<Self> {
        // No less than 3 threads to avoid deadlock.
        let thread_num = std::cmp::max(thread_num, 3);
        let (read_bufs_send, read_bufs_recv) = flume::unbounded();
        let (used_block_sender, used_block_receiver) = flume::unbounded();
        let (completed_task_tx, sorting_blocks_rx) = flume::unbounded::<Task>();
        let (ready_tasks_tx, ready_to_processing_rx) = flume::unbounded();
        for _ in 0..thread_num {
            let _ = read_bufs_send.send(Vec::new());
            let _ = used_block_sender.send(Block::default());
        }
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(thread_num)
                .thread_name(|i| format!("bgzf-readahead-{}", i))
                .build()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
        );

        // Ordering thread.
        pool.spawn(move || {
            // Blocks are not necessarily inflated in stream order.
            let mut block_heap = BinaryHeap::<Task>::new();
            let mut cur_block_num = 0;
            while let Ok(task) = sorting_blocks_rx.recv() {
                block_heap.push(task);
                while block_heap.peek().map_or(false, |t| t.0 == cur_block_num) {
                    if let Some(Task(_, status)) = block_heap.pop() {
                        if ready_tasks_tx.send(status).is_err() {
                            // Reader dropped.
                            return;
                        }
                    }
                    cur_block_num += 1;
                }
            }
        });

        // Reading thread.
        let inflate_pool = Arc::clone(&pool);
        pool.spawn(move || {
            let mut cur_task: usize = 0;
            while let Ok(mut block) = used_block_receiver.recv() {
                let mut read_buf = match read_bufs_recv.recv() {
                    Ok(buf) => buf,
                    Err(_) => return,
                };
                let task_ready_to_sort_tx = completed_task_tx.clone();
                match fetch_block(&mut reader, &mut read_buf, &mut block) {
                    Ok(0) => {
                        let _ = task_ready_to_sort_tx.send(Task(cur_task, Status::Eof));
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = task_ready_to_sort_tx.send(Task(cur_task, Status::Failed(e)));
                        return;
                    }
                }

                let read_buf_sender = read_bufs_send.clone();
                let task_num = cur_task;
                inflate_pool.spawn(move || {
                    let status = match decompress_block(&read_buf, &mut block) {
                        Ok(()) => Status::Success(block),
                        Err(e) => Status::Failed(e),
                    };
                    let _ = task_ready_to_sort_tx.send(Task(task_num, status));
                    let _ = read_buf_sender.send(read_buf);
                });

                cur_task += 1;
            }
        });
        Ok(Self {
            used_block_sender,
            ready_to_processing_rx,
            finished: false,
        })
    }

    /// Hands back a consumed block and waits for the next one. `None` at end
    /// of stream.
    pub fn get_block(&mut self, old_buf: Block) -> io::Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }
        // The reading thread may have stopped already, the block is then
        // simply dropped.
        let _ = self.used_block_sender.send(old_buf);
        let status = self.ready_to_processing_rx.recv().map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "BGZF readahead stopped")
        })?;
        match status {
            Status::Success(block) => Ok(Some(block)),
            Status::Eof => {
                self.finished = true;
                Ok(None)
            }
            Status::Failed(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }
}
