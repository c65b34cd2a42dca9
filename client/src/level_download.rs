//! Downloads an announced level over the TCP side channel

use log::{debug, info};
use shared::{Level, NetError, Result};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// The server binds its listener lazily, so a refused connect is retried
async fn connect(server: SocketAddr) -> io::Result<TcpStream> {
    loop {
        match TcpStream::connect(server).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("Level server at {} not ready yet", server);
                sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reads the raw PNG until the server closes the stream
pub async fn fetch_level_bytes(server: SocketAddr) -> io::Result<Vec<u8>> {
    let mut stream = connect(server).await?;
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

/// Fetches and decodes a level, giving up after `limit`
pub async fn download_level(
    server: SocketAddr,
    path: &str,
    width: u32,
    height: u32,
    limit: Duration,
) -> Result<Level> {
    let bytes = timeout(limit, fetch_level_bytes(server))
        .await
        .map_err(|_| NetError::LevelTimeout)??;
    info!("Downloaded {} ({} bytes)", path, bytes.len());
    Level::from_png(path, &bytes, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_downloads_and_crops() {
        let png = Level::blank(12, 9).to_png().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&png).await.unwrap();
        });

        let level = download_level(addr, "arena.png", 10, 8, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!((level.width(), level.height()), (10, 8));
        assert_eq!(level.path(), "arena.png");
    }

    #[tokio::test]
    async fn test_truncated_image_is_an_error() {
        let png = Level::blank(12, 9).to_png().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&png[..png.len() / 2]).await.unwrap();
        });

        let result = download_level(addr, "arena.png", 10, 8, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(NetError::Image(_))));
    }

    #[tokio::test]
    async fn test_gives_up_when_nobody_serves() {
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let result = download_level(addr, "arena.png", 10, 8, Duration::from_millis(200)).await;
        assert!(matches!(assert_err!(result), NetError::LevelTimeout));
    }
}
