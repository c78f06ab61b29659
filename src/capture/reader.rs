use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use image::RgbImage;

use super::FramePoll;

type Message = Result<RgbImage>;

/// Sending half used by a reader thread.
///
/// Live readers keep only the newest frame: when the consumer lags, the
/// queued frame is dropped in favour of the new one. Non-live readers block
/// until the consumer catches up or the reader is stopped.
#[derive(Clone)]
pub(crate) struct FrameSender {
    tx: Sender<Message>,
    drain: Receiver<Message>,
    live: bool,
    stop: Arc<AtomicBool>,
}

impl FrameSender {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Hand a frame (or an error) to the consumer. `false` once nobody listens.
    pub(crate) fn send(&self, message: Message) -> bool {
        if self.live {
            return self.send_latest(message);
        }
        let mut message = message;
        loop {
            if self.is_stopped() {
                return false;
            }
            match self.tx.send_timeout(message, Duration::from_millis(50)) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => message = back,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn send_latest(&self, message: Message) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                let _ = self.drain.try_recv();
                !matches!(self.tx.try_send(message), Err(TrySendError::Disconnected(_)))
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Receiving half owned by a frame source.
///
/// Dropping it stops the reader thread and kills the child process, if any.
pub(crate) struct FrameReader {
    rx: Receiver<Message>,
    stop: Arc<AtomicBool>,
    child: Option<Child>,
}

impl FrameReader {
    pub(crate) fn channel(live: bool) -> (FrameSender, FrameReader) {
        let (tx, rx) = bounded(if live { 1 } else { 2 });
        let stop = Arc::new(AtomicBool::new(false));
        let sender = FrameSender {
            tx,
            drain: rx.clone(),
            live,
            stop: stop.clone(),
        };
        let reader = FrameReader {
            rx,
            stop,
            child: None,
        };
        (sender, reader)
    }

    /// Run `cmd` and read packed RGB24 frames of `width` x `height` from its stdout.
    pub(crate) fn spawn_rawvideo(
        mut cmd: Command,
        width: u32,
        height: u32,
        live: bool,
        name: &str,
    ) -> Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = cmd.spawn().context("Failed to start ffmpeg")?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;

        let (sender, mut reader) = Self::channel(live);
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || rawvideo_loop(stdout, width, height, sender));
        if let Err(err) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err).context("Failed to spawn reader thread");
        }
        reader.child = Some(child);
        Ok(reader)
    }

    pub(crate) fn poll(&self, timeout: Duration) -> Result<FramePoll> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(FramePoll::Frame(frame)),
            Ok(Err(err)) => Err(err),
            Err(RecvTimeoutError::Timeout) => Ok(FramePoll::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(FramePoll::EndOfStream),
        }
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn rawvideo_loop(mut stdout: impl Read, width: u32, height: u32, sender: FrameSender) {
    let frame_bytes = width as usize * height as usize * 3;
    let mut frames = 0u64;
    loop {
        let mut buffer = vec![0u8; frame_bytes];
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                if !sender.is_stopped() {
                    sender.send(Err(anyhow!(err).context("Failed to read from ffmpeg")));
                }
                break;
            }
        }
        let Some(frame) = RgbImage::from_raw(width, height, buffer) else {
            break;
        };
        frames += 1;
        if !sender.send(Ok(frame)) {
            break;
        }
    }
    tracing::debug!("Reader finished after {} frames", frames);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn rawvideo_splits_stream_into_frames() {
        let (sender, reader) = FrameReader::channel(false);
        let bytes: Vec<u8> = (0..2 * 2 * 3 * 2).map(|v| v as u8).collect();
        let handle = thread::spawn(move || rawvideo_loop(Cursor::new(bytes), 2, 2, sender));

        let FramePoll::Frame(first) = reader.poll(Duration::from_secs(1)).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(first.get_pixel(1, 0).0, [3, 4, 5]);
        let FramePoll::Frame(second) = reader.poll(Duration::from_secs(1)).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(second.get_pixel(0, 0).0, [12, 13, 14]);
        handle.join().unwrap();
        assert!(matches!(
            reader.poll(Duration::from_millis(10)).unwrap(),
            FramePoll::EndOfStream
        ));
    }

    #[test]
    fn live_sender_keeps_newest_frame() {
        let (sender, reader) = FrameReader::channel(true);
        for v in 0..5u8 {
            assert!(sender.send(Ok(RgbImage::from_pixel(1, 1, image::Rgb([v, v, v])))));
        }
        let FramePoll::Frame(frame) = reader.poll(Duration::from_millis(10)).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(frame.get_pixel(0, 0).0, [4, 4, 4]);
        assert!(matches!(
            reader.poll(Duration::from_millis(5)).unwrap(),
            FramePoll::Timeout
        ));
    }

    #[test]
    fn dropping_reader_stops_blocked_sender() {
        let (sender, reader) = FrameReader::channel(false);
        let handle = thread::spawn(move || {
            let mut sent = 0;
            while sender.send(Ok(RgbImage::new(1, 1))) {
                sent += 1;
            }
            sent
        });
        thread::sleep(Duration::from_millis(20));
        drop(reader);
        assert_eq!(handle.join().unwrap(), 2);
    }
}
