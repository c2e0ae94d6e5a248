use std::io::{ErrorKind, Read, Write};

use funi_protocol::{StepCommand, MAX_REQUEST_LEN};
use indicatif::ProgressBar;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("I/O error talking to the driver: {0}")]
    Io(#[from] std::io::Error),
    #[error("the driver hung up")]
    Closed,
    #[error("the driver asked for {0} bytes")]
    MalformedRequest(u8),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// How many requests we answered.
    pub rounds: u64,
    /// Bytes of actual drawing data sent.
    pub payload_bytes: u64,
    /// Zero steps sent after the drawing ran out, to fill out the last request.
    pub padding_bytes: u64,
}

/// The connection to the stepper driver.
///
/// The driver is in charge of the pacing: it sends a single byte saying how
/// many values it wants, and we answer with exactly that many.
pub struct TransportLink<T> {
    port: T,
    stats: LinkStats,
    progress: ProgressBar,
}

impl<T: Read + Write> TransportLink<T> {
    /// Resets the driver, which then starts asking for data.
    pub fn open(mut port: T) -> Result<Self, LinkError> {
        port.write_all(&[StepCommand::Reset.to_byte()])?;
        port.flush()?;
        Ok(TransportLink {
            port,
            stats: LinkStats::default(),
            progress: ProgressBar::hidden(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn into_inner(self) -> T {
        self.port
    }

    fn read_request(&mut self) -> Result<usize, LinkError> {
        let mut buf = [0u8; 1];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Err(LinkError::Closed),
                Ok(_) => break,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                    continue
                }
                Err(e) => return Err(e.into()),
            }
        }

        let len = usize::from(buf[0]);
        if len == 0 || len % 2 != 0 || len > MAX_REQUEST_LEN {
            return Err(LinkError::MalformedRequest(buf[0]));
        }
        Ok(len)
    }

    /// Feeds `steps` to the driver until they run out.
    pub fn run(
        &mut self,
        steps: impl IntoIterator<Item = StepCommand>,
    ) -> Result<LinkStats, LinkError> {
        let mut steps = steps.into_iter().peekable();
        let mut buf = Vec::with_capacity(MAX_REQUEST_LEN);

        while steps.peek().is_some() {
            let len = self.read_request()?;

            buf.clear();
            buf.extend(steps.by_ref().take(len).map(StepCommand::to_byte));
            let payload = buf.len();
            buf.resize(len, StepCommand::default().to_byte());

            self.port.write_all(&buf)?;
            self.port.flush()?;

            self.stats.rounds += 1;
            self.stats.payload_bytes += payload as u64;
            self.stats.padding_bytes += (len - payload) as u64;
            self.progress.inc(payload as u64);
            if self.stats.rounds % 100 == 0 {
                log::debug!(
                    "{} rounds, {} bytes sent",
                    self.stats.rounds,
                    self.stats.payload_bytes
                );
            }
        }

        self.progress.finish_with_message("done");
        log::info!(
            "sent {} bytes in {} rounds ({} bytes of padding)",
            self.stats.payload_bytes,
            self.stats.rounds,
            self.stats.padding_bytes
        );
        Ok(self.stats)
    }
}
