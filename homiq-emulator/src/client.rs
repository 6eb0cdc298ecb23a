//! One-shot sender: write a frame to a bridge and wait for its ACK

use std::time::Duration;

use anyhow::{bail, Context};
use homiq_protocol::{parse_frame, Frame, FrameBuffer, FrameType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

/// What to send and how hard to try
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// `HOST:PORT` of the bridge
    pub addr: String,
    /// Frame to send; its checksum is recomputed on the wire
    pub frame: Frame,
    /// Attempts before giving up
    pub retries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// How long each attempt waits for the ACK
    pub timeout: Duration,
    /// Acknowledge unsolicited `send` frames while waiting
    pub auto_ack: bool,
}

/// Whether `reply` acknowledges `request`
///
/// The ACK comes from the addressed module back to the sender with the same
/// command and sequence id.
pub fn is_ack_for(request: &Frame, reply: &Frame) -> bool {
    reply.frame_type == FrameType::Ack
        && reply.cmd == request.cmd
        && reply.src == request.dst
        && reply.dst == request.src
        && reply.id == request.id
}

/// Send with retries; `Ok(true)` once a matching ACK arrives
pub async fn send_with_retry(options: &SendOptions) -> anyhow::Result<bool> {
    let mut stream = TcpStream::connect(&options.addr)
        .await
        .with_context(|| format!("Failed to connect to {}", options.addr))?;
    let wire = options.frame.encode();
    let mut buffer = FrameBuffer::new();
    let mut chunk = [0u8; 4096];

    for attempt in 1..=options.retries {
        debug!("Attempt {}/{}: {}", attempt, options.retries, options.frame.serialize(true).trim_end());
        stream.write_all(&wire).await.context("Write failed")?;

        let deadline = Instant::now() + options.timeout;
        loop {
            let n = match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
                Err(_) => break,
                Ok(result) => result.context("Read failed")?,
            };
            if n == 0 {
                bail!("Connection closed by {}", options.addr);
            }

            for line in buffer.push(&chunk[..n]) {
                let Some(parsed) = parse_frame(&line) else {
                    continue;
                };
                if is_ack_for(&options.frame, &parsed.frame) {
                    return Ok(true);
                }
                if options.auto_ack && parsed.frame.frame_type == FrameType::Send {
                    debug!("Auto-ACK {}", line);
                    stream
                        .write_all(&parsed.frame.ack(None).encode())
                        .await
                        .context("Write failed")?;
                }
            }
        }

        if attempt != options.retries {
            tokio::time::sleep(options.retry_delay).await;
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use homiq_protocol::FrameId;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn request() -> Frame {
        Frame::send("O.3", "1", "0", "05", FrameId::new(7).unwrap())
    }

    fn options(addr: String) -> SendOptions {
        SendOptions {
            addr,
            frame: request(),
            retries: 2,
            retry_delay: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
            auto_ack: false,
        }
    }

    #[test]
    fn test_ack_matching() {
        let req = request();
        assert!(is_ack_for(&req, &req.ack(None)));

        // Echoed send frame is not an ACK
        assert!(!is_ack_for(&req, &req));

        let mut other_id = req.ack(None);
        other_id.id = FrameId::new(8).unwrap();
        assert!(!is_ack_for(&req, &other_id));

        let mut other_src = req.ack(None);
        other_src.src = "06".into();
        assert!(!is_ack_for(&req, &other_src));
    }

    #[tokio::test]
    async fn test_ack_on_second_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            // Ignore the first attempt, answer the second after some noise
            lines.next_line().await.unwrap();
            let line = lines.next_line().await.unwrap().unwrap();
            let ack = parse_frame(&line).unwrap().frame.ack(None);
            write.write_all(b"noise\r\n").await.unwrap();
            write.write_all(&ack.encode()).await.unwrap();
        });

        assert!(send_with_retry(&options(addr)).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_ack_exhausts_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let mut seen = 0;
            while let Ok(Some(_)) = lines.next_line().await {
                seen += 1;
            }
            seen
        });

        assert!(!send_with_retry(&options(addr)).await.unwrap());
        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_auto_ack_answers_pushes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            let request = lines.next_line().await.unwrap().unwrap();
            let push = Frame::send("I.0", "1", "01", "0", FrameId::new(3).unwrap());
            write.write_all(&push.encode()).await.unwrap();

            // Only answer once the push was acknowledged
            let reply = lines.next_line().await.unwrap().unwrap();
            let reply = parse_frame(&reply).unwrap().frame;
            assert!(is_ack_for(&push, &reply));

            let ack = parse_frame(&request).unwrap().frame.ack(None);
            write.write_all(&ack.encode()).await.unwrap();
        });

        let mut opts = options(addr);
        opts.auto_ack = true;
        opts.timeout = Duration::from_secs(2);
        assert!(send_with_retry(&opts).await.unwrap());
    }
}
