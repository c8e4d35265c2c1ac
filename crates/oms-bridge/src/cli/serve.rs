//! NDJSON ingest loop.
//!
//! Reads one telegram report per line, runs each through the pipeline on
//! its own task and writes one JSON reply line per input line. Replies
//! carry the input line number because they are written as they complete.

use std::sync::Arc;

use oms_core::report::parse_report_line;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::pipeline::{Disposition, IngestPipeline, IngestResponse};

#[derive(Serialize)]
struct IngestedReply<'a> {
    line: usize,
    #[serde(flatten)]
    response: &'a IngestResponse,
}

#[derive(Serialize)]
struct InvalidReply {
    line: usize,
    status: &'static str,
    error: String,
}

/// Counters for one ingest session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeStats {
    pub delivered: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub invalid: usize,
}

impl ServeStats {
    fn count(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Delivered => self.delivered += 1,
            Disposition::Accepted => self.accepted += 1,
            Disposition::Rejected => self.rejected += 1,
        }
    }
}

/// Ingest every line from `reader` until EOF, at most `max_in_flight` at once.
///
/// Only a failed read ends the session. Lines that cannot be parsed get an
/// `invalid` reply, and a reply that cannot be written is logged and the
/// line counted as rejected.
pub async fn serve_lines<R, W>(
    pipeline: Arc<IngestPipeline>,
    mut reader: R,
    writer: W,
    max_in_flight: usize,
) -> anyhow::Result<ServeStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(writer));
    let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut tasks: JoinSet<Disposition> = JoinSet::new();
    let mut stats = ServeStats::default();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        line_no += 1;

        let Ok(line) = std::str::from_utf8(&buf) else {
            debug!(line = line_no, "Report is not valid UTF-8");
            stats.invalid += 1;
            reply_invalid(&writer, line_no, "invalid_utf8".to_string()).await;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let report = match parse_report_line(line) {
            Ok(report) => report,
            Err(e) => {
                debug!(line = line_no, error = %e, "Invalid report");
                stats.invalid += 1;
                let error = match e {
                    oms_core::Error::Report(code) => code.to_string(),
                    other => other.to_string(),
                };
                reply_invalid(&writer, line_no, error).await;
                continue;
            }
        };

        let permit = Arc::clone(&permits).acquire_owned().await?;
        let pipeline = Arc::clone(&pipeline);
        let writer = Arc::clone(&writer);
        let number = line_no;
        tasks.spawn(async move {
            let _permit = permit;
            let response = pipeline.ingest(&report).await;
            let disposition = response.status.disposition(pipeline.policy());
            if disposition == Disposition::Rejected {
                warn!(line = number, status = %response.status, meter_id = %response.meter_id, "Telegram rejected");
            }
            let reply = IngestedReply {
                line: number,
                response: &response,
            };
            if let Err(e) = write_reply(&writer, &reply).await {
                warn!(line = number, error = %e, "Failed to write reply");
                return Disposition::Rejected;
            }
            disposition
        });

        while let Some(done) = tasks.try_join_next() {
            settle(&mut stats, done);
        }
    }

    while let Some(done) = tasks.join_next().await {
        settle(&mut stats, done);
    }

    info!(
        delivered = stats.delivered,
        accepted = stats.accepted,
        rejected = stats.rejected,
        invalid = stats.invalid,
        "Ingest stream finished"
    );
    Ok(stats)
}

fn settle(stats: &mut ServeStats, done: Result<Disposition, JoinError>) {
    match done {
        Ok(disposition) => stats.count(disposition),
        Err(e) => {
            warn!(error = %e, "Ingest task failed");
            stats.rejected += 1;
        }
    }
}

async fn reply_invalid<W>(writer: &Mutex<W>, line: usize, error: String)
where
    W: AsyncWrite + Unpin,
{
    let reply = InvalidReply {
        line,
        status: "invalid",
        error,
    };
    if let Err(e) = write_reply(writer, &reply).await {
        warn!(line, error = %e, "Failed to write reply");
    }
}

async fn write_reply<W, T>(writer: &Mutex<W>, reply: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut data = serde_json::to_vec(reply)?;
    data.push(b'\n');
    let mut writer = writer.lock().await;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}
