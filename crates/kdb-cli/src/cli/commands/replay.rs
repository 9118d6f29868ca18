//! Replay command handler.
//!
//! Feeds a recorded chat response back through the same decode-and-render
//! path a live response takes, one line per chunk.

use std::convert::Infallible;
use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::stream;
use kdb_core::interrupt;
use kdb_core::stream::{FragmentStream, StreamOutcome, StreamingMessage};

pub async fn run(file: &Path, frames: bool) -> Result<()> {
    let contents = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let chunks: Vec<Result<Bytes, Infallible>> = contents
        .split_inclusive(|b| *b == b'\n')
        .map(|line| Ok(Bytes::copy_from_slice(line)))
        .collect();

    interrupt::init()?;

    let mut fragments = FragmentStream::new(stream::iter(chunks));
    let mut message = StreamingMessage::new();

    let outcome = message
        .drive(&mut fragments, |html| {
            if frames {
                println!("{html}");
            }
        })
        .await
        .with_context(|| format!("replay {}", file.display()))?;

    tracing::info!(
        fragments = message.fragment_count(),
        ?outcome,
        "replay finished"
    );

    match outcome {
        StreamOutcome::Interrupted => return Err(interrupt::InterruptedError.into()),
        StreamOutcome::Truncated => eprintln!("warning: stream ended without [DONE]"),
        StreamOutcome::Completed => {}
    }

    if !frames {
        println!("{}", message.html());
    }
    Ok(())
}
