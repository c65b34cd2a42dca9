//! Reliable side channel that streams the level image to joining players
//!
//! The relay queues one [`TransferJob`] per announced LEVEL. A dedicated task
//! binds a TCP listener on the relay's port the first time a job arrives,
//! then serves jobs strictly in order: accept exactly one connection, write
//! the PNG bytes, close. There is no framing; the client reads to EOF.
//!
//! Every job of one level shares the same PNG buffer. Once a newer level is
//! queued, jobs still holding the old buffer are dropped so nobody is handed
//! a map that is no longer in play.

use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// One pending stream of the level image
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub recipient: SocketAddr,
    pub png: Arc<Vec<u8>>,
}

/// Accepts one connection and writes `png` to it
pub async fn serve_one(listener: &TcpListener, png: &[u8]) -> io::Result<SocketAddr> {
    let (mut stream, peer) = listener.accept().await?;
    stream.write_all(png).await?;
    stream.shutdown().await?;
    Ok(peer)
}

/// Removes queued jobs that stream an older level than the newest job
pub fn drop_stale(queue: &mut VecDeque<TransferJob>) -> usize {
    let Some(newest) = queue.back().map(|job| Arc::clone(&job.png)) else {
        return 0;
    };
    let before = queue.len();
    queue.retain(|job| {
        let current = Arc::ptr_eq(&job.png, &newest);
        if !current {
            debug!("Dropping stale level transfer for {}", job.recipient);
        }
        current
    });
    before - queue.len()
}

/// Spawns the task that works through queued transfers
///
/// Jobs whose recipient does not connect within `accept_timeout` are
/// abandoned so that one absent client cannot hold up the queue forever.
/// A wait is also abandoned as soon as a job for a different level arrives.
pub fn spawn_transfer_task(
    bind_addr: SocketAddr,
    accept_timeout: Duration,
    mut jobs: mpsc::UnboundedReceiver<TransferJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut listener: Option<TcpListener> = None;
        let mut queue: VecDeque<TransferJob> = VecDeque::new();

        loop {
            if queue.is_empty() {
                match jobs.recv().await {
                    Some(job) => queue.push_back(job),
                    None => break,
                }
            }
            while let Ok(job) = jobs.try_recv() {
                queue.push_back(job);
            }
            drop_stale(&mut queue);
            let Some(job) = queue.pop_front() else {
                continue;
            };

            if listener.is_none() {
                match TcpListener::bind(bind_addr).await {
                    Ok(bound) => {
                        info!("Level transfer listening on {}", bind_addr);
                        listener = Some(bound);
                    }
                    Err(e) => {
                        error!("Failed to bind level transfer listener on {}: {}", bind_addr, e);
                        continue;
                    }
                }
            }
            let Some(active) = listener.as_ref() else {
                continue;
            };

            debug!(
                "Waiting for {} to download the level ({} bytes)",
                job.recipient,
                job.png.len()
            );
            let mut serving = pin!(timeout(accept_timeout, serve_one(active, &job.png)));
            loop {
                tokio::select! {
                    biased;

                    Some(next) = jobs.recv() => {
                        let newer_level = !Arc::ptr_eq(&next.png, &job.png);
                        queue.push_back(next);
                        if newer_level {
                            info!("Level changed, abandoning transfer to {}", job.recipient);
                            break;
                        }
                    }
                    result = &mut serving => {
                        match result {
                            Ok(Ok(peer)) => {
                                if peer.ip() != job.recipient.ip() {
                                    debug!("Level for {} was fetched by {}", job.recipient, peer);
                                }
                                info!("Sent level to {}", peer);
                            }
                            Ok(Err(e)) => error!("Level transfer to {} failed: {}", job.recipient, e),
                            Err(_) => warn!("{} never fetched the level, skipping", job.recipient),
                        }
                        break;
                    }
                }
            }
        }

        debug!("Level transfer queue closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    fn job(port: u16, png: &Arc<Vec<u8>>) -> TransferJob {
        TransferJob {
            recipient: SocketAddr::from(([127, 0, 0, 1], port)),
            png: Arc::clone(png),
        }
    }

    async fn download(addr: SocketAddr) -> Vec<u8> {
        let mut attempts = 0;
        let mut stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(_) if attempts < 50 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("could not connect: {}", e),
            }
        };
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    }

    #[test]
    fn test_drop_stale_keeps_only_newest_level() {
        let old_level = Arc::new(vec![1u8; 4]);
        let new_level = Arc::new(vec![2u8; 4]);
        let mut queue: VecDeque<TransferJob> = [
            job(1, &old_level),
            job(2, &old_level),
            job(1, &new_level),
            job(2, &new_level),
        ]
        .into_iter()
        .collect();

        assert_eq!(drop_stale(&mut queue), 2);
        assert!(queue.iter().all(|j| Arc::ptr_eq(&j.png, &new_level)));
        assert_eq!(queue[0].recipient.port(), 1);
        assert_eq!(drop_stale(&mut queue), 0);
        assert_eq!(drop_stale(&mut VecDeque::new()), 0);
    }

    #[tokio::test]
    async fn test_level_change_skips_old_transfer() {
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_transfer_task(addr, Duration::from_secs(5), rx);

        let old_level = Arc::new(vec![1u8; 32]);
        let new_level = Arc::new(vec![2u8; 32]);
        tx.send(job(addr.port(), &old_level)).unwrap();
        tx.send(job(addr.port(), &new_level)).unwrap();

        assert_eq!(download(addr).await, vec![2u8; 32]);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_one_writes_everything_then_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let server = tokio::spawn(async move { serve_one(&listener, &payload).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();

        assert_eq!(received, expected);
        assert!(server.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_queue_serves_every_job_of_a_level() {
        // Reserve a free port, then let the task bind it lazily
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_transfer_task(addr, Duration::from_secs(5), rx);

        let level = Arc::new((0..64u8).collect::<Vec<u8>>());
        for port in [4000, 4001] {
            tx.send(job(port, &level)).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(download(addr).await);
        }

        assert_eq!(seen, vec![level.to_vec(), level.to_vec()]);
        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_absent_recipient_times_out() {
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_transfer_task(addr, Duration::from_millis(50), rx);
        tx.send(TransferJob {
            recipient: addr,
            png: Arc::new(vec![0u8; 8]),
        })
        .unwrap();
        drop(tx);

        // the task gives up on the job and then ends with the closed queue
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
