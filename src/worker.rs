// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Background image processing.
//!
//! Arena ids mean nothing outside the arena that issued them, so work is
//! handed to worker threads as encoded bytes. Each worker thread owns its
//! own arena: it decodes the payload, runs the [`Pipeline`], encodes the
//! result and disposes everything it created before replying with bytes.
//!
//! Submissions are independent. Results may complete in any order and a
//! queued job cannot be cancelled.

use crate::{
    arena::NativeArena,
    error::{Error, Result},
    handle::{Image, SharedArena},
    pipeline::Pipeline,
};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};
use tracing::{debug, debug_span, warn};

type Reply = Result<Vec<u8>>;

struct Job {
    bytes: Vec<u8>,
    pipeline: Pipeline,
    ext: String,
    reply: kanal::Sender<Reply>,
}

enum Message {
    Job(Job),
    Stop,
}

/// Pending result of a submitted job.
#[must_use = "a ticket must be waited on to observe the result"]
pub struct Ticket {
    reply: kanal::Receiver<Reply>,
}

impl Ticket {
    /// Blocks until the encoded result is ready.
    pub fn wait(self) -> Result<Vec<u8>> {
        self.reply
            .recv()
            .map_err(|_| Error::Worker("dropped the job"))?
    }

    /// Blocks for the result and decodes it into `arena`.
    pub fn wait_image(self, arena: &SharedArena) -> Result<Image> {
        let bytes = self.wait()?;
        Image::decode(arena, &bytes)
    }

    /// Awaits the encoded result without blocking the runtime.
    pub async fn recv_async(self) -> Result<Vec<u8>> {
        self.reply
            .to_async()
            .recv()
            .await
            .map_err(|_| Error::Worker("dropped the job"))?
    }
}

/// Pool of worker threads, each with a private arena.
///
/// Dropping the worker lets queued jobs finish and joins the threads.
///
/// ```
/// use cvbind::{handle::{Image, SharedArena}, pipeline::Pipeline, worker::Worker, NativeArena};
/// use std::sync::Arc;
///
/// # fn main() -> cvbind::Result<()> {
/// let arena: SharedArena = Arc::new(NativeArena::new());
/// let worker = Worker::new(2)?;
///
/// let frame = Image::new(&arena, 64, 48, 3)?;
/// let pipeline: Pipeline = r#"[{"transform":"gray"}]"#.parse()?;
/// let gray = worker.process(&frame, &pipeline, ".png")?;
/// assert_eq!(gray.channels()?, 1);
/// # Ok(())
/// # }
/// ```
pub struct Worker {
    jobs: kanal::Sender<Message>,
    threads: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Starts `threads` workers (at least one), each with a `NativeArena`.
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_arena(threads, || Arc::new(NativeArena::new()) as SharedArena)
    }

    /// Starts workers whose arenas come from `factory`, called once on each
    /// worker thread.
    pub fn with_arena<F>(threads: usize, factory: F) -> Result<Self>
    where
        F: Fn() -> SharedArena + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        let (jobs, queue) = kanal::unbounded::<Message>();
        let threads = (0..threads.max(1))
            .map(|n| {
                let queue = queue.clone();
                let factory = factory.clone();
                thread::Builder::new()
                    .name(format!("cvbind-worker-{n}"))
                    .spawn(move || run(n, factory(), queue))
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        debug!("started {} worker threads", threads.len());
        Ok(Self { jobs, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads.len()
    }

    /// Queues encoded image bytes for `pipeline`; the result is encoded to
    /// `ext`.
    pub fn submit(&self, bytes: Vec<u8>, pipeline: Pipeline, ext: &str) -> Result<Ticket> {
        let (reply, ticket) = kanal::bounded(1);
        let job = Job {
            bytes,
            pipeline,
            ext: ext.to_owned(),
            reply,
        };
        self.jobs
            .send(Message::Job(job))
            .map_err(|_| Error::Worker("queue is closed"))?;
        Ok(Ticket { reply: ticket })
    }

    /// Encodes `image` on the calling thread and queues it.
    pub fn submit_image(&self, image: &Image, pipeline: Pipeline, ext: &str) -> Result<Ticket> {
        let bytes = image.encode(ext)?;
        if bytes.is_empty() {
            return Err(Error::Allocation("encode"));
        }
        self.submit(bytes, pipeline, ext)
    }

    /// Full round trip: encode, process on a worker, decode into the arena
    /// of `image`.
    pub fn process(&self, image: &Image, pipeline: &Pipeline, ext: &str) -> Result<Image> {
        self.submit_image(image, pipeline.clone(), ext)?
            .wait_image(image.arena())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        for _ in 0..self.threads.len() {
            if self.jobs.send(Message::Stop).is_err() {
                break;
            }
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

fn run(n: usize, arena: SharedArena, queue: kanal::Receiver<Message>) {
    while let Ok(Message::Job(job)) = queue.recv() {
        let _span = debug_span!("job", worker = n, bytes = job.bytes.len()).entered();
        let start = Instant::now();
        let result = process(&arena, &job);
        match &result {
            Ok(bytes) => debug!("{} bytes in {:?}", bytes.len(), start.elapsed()),
            Err(e) => debug!("failed: {e}"),
        }
        // The submitter may have dropped its ticket.
        let _ = job.reply.send(result);
    }
    debug!("worker {n} exiting with {} live buffers", arena.live_buffers());
}

fn process(arena: &SharedArena, job: &Job) -> Result<Vec<u8>> {
    let src = Image::decode(arena, &job.bytes)?;
    let out = job.pipeline.run(&src)?;
    src.dispose();
    let bytes = out.encode(&job.ext)?;
    out.dispose();
    if bytes.is_empty() {
        return Err(Error::Allocation("encode"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload() {
        let worker = Worker::new(1).unwrap();
        let ticket = worker
            .submit(vec![1, 2, 3], Pipeline::default(), ".png")
            .unwrap();
        assert!(matches!(ticket.wait(), Err(Error::Allocation("decode"))));
    }

    #[test]
    fn drop_finishes_queued_jobs() {
        let arena: SharedArena = Arc::new(NativeArena::new());
        let image = Image::new(&arena, 8, 8, 3).unwrap();
        let worker = Worker::new(1).unwrap();
        let tickets: Vec<Ticket> = (0..4)
            .map(|_| worker.submit_image(&image, Pipeline::default(), ".bmp").unwrap())
            .collect();
        drop(worker);
        for ticket in tickets {
            assert!(!ticket.wait().unwrap().is_empty());
        }
    }
}
