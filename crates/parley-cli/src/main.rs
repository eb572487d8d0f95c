use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use futures::Stream;
use tokio_stream::StreamExt;

use parley_core::config::Config;
use parley_core::{DeferredAggregator, Entry, MessageAdapter};
use parley_providers::anthropic::{RawEvent, RequestBuilder, decode_events};
use parley_providers::sse::parse_sse_stream;
use parley_providers::wire::{self, AnthropicAdapter, OpenAiAdapter};

mod logging;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Replay backend streams and inspect aggregated conversation requests",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a recorded Anthropic event stream and print normalized events
    Replay {
        /// JSON-lines file of raw events, or an SSE transcript with --sse
        file: PathBuf,

        /// Treat the file as a raw SSE transcript
        #[arg(long)]
        sse: bool,
    },

    /// Aggregate role-tagged items and print the resulting messages
    Aggregate {
        /// JSON-lines file of `{"role": ..., "item": ...}` entries
        file: PathBuf,

        /// Wire format to project the messages into
        #[arg(long, value_enum, default_value_t = WireFormat::None)]
        wire: WireFormat,
    },

    /// Aggregate items and print the full Anthropic request body
    Request {
        /// JSON-lines file of `{"role": ..., "item": ...}` entries
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WireFormat {
    Anthropic,
    Openai,
    None,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    logging::init(cli.verbose, config.logging.as_ref());
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("config: {warning}");
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid config {}: {}", config_path.display(), errors.join("; "));
    }

    match cli.command {
        Commands::Replay { file, sse } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            if sse {
                let bytes = futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from(content))]);
                print_events(decode_events(parse_sse_stream(bytes))).await?;
            } else {
                let events = parse_json_lines::<RawEvent>(&content, &file)?;
                print_events(futures::stream::iter(events.into_iter().map(Ok))).await?;
            }
        }
        Commands::Aggregate { file, wire } => {
            let entries = read_entries(&file).await?;
            let output = match wire {
                WireFormat::Anthropic => serde_json::to_value(aggregate(AnthropicAdapter, entries)?)?,
                WireFormat::Openai => {
                    serde_json::to_value(wire::flatten(aggregate(OpenAiAdapter, entries)?))?
                }
                WireFormat::None => serde_json::to_value(aggregate(
                    parley_core::IdentityAdapter,
                    entries,
                )?)?,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Request { file } => {
            let entries = read_entries(&file).await?;
            let history = aggregate(AnthropicAdapter, entries)?;
            let request = RequestBuilder::from_config(&config).history(history).build();
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
    }

    Ok(())
}

/// Print each translated event as one JSON line. The first error aborts.
async fn print_events<S>(raw: S) -> anyhow::Result<()>
where
    S: Stream<Item = parley_core::Result<RawEvent>>,
{
    let events = parley_providers::translate(raw);
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        let event = event?;
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

async fn read_entries(file: &Path) -> anyhow::Result<Vec<Entry>> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    parse_json_lines(&content, file)
}

fn parse_json_lines<T: serde::de::DeserializeOwned>(content: &str, file: &Path) -> anyhow::Result<Vec<T>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("{}:{}: invalid entry", file.display(), n + 1))
        })
        .collect()
}

fn aggregate<A: MessageAdapter>(adapter: A, entries: Vec<Entry>) -> anyhow::Result<Vec<A::Wire>> {
    let mut aggregator = DeferredAggregator::with_adapter(adapter);
    for entry in entries {
        aggregator.add(entry.role, entry.item)?;
    }
    tracing::debug!(entries = aggregator.entries().len(), "Aggregated entries");
    Ok(aggregator.materialize())
}

#[cfg(test)]
mod tests {
    use parley_core::{ContentItem, Message, Role};

    use super::*;

    #[test]
    fn test_parse_json_lines_skips_blank_lines() {
        let content = "{\"role\":\"user\",\"item\":{\"type\":\"text\",\"text\":\"hi\"}}\n\n";
        let entries: Vec<Entry> = parse_json_lines(content, Path::new("feed.jsonl")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role, Role::User);
    }

    #[test]
    fn test_parse_json_lines_reports_line_number() {
        let content = "{\"role\":\"user\",\"item\":{\"type\":\"text\",\"text\":\"hi\"}}\nnot json\n";
        let err = parse_json_lines::<Entry>(content, Path::new("feed.jsonl")).unwrap_err();
        assert!(err.to_string().contains("feed.jsonl:2"));
    }

    #[test]
    fn test_aggregate_merges_and_rejects() {
        let entries = vec![
            Entry {
                role: Role::User,
                item: ContentItem::text("a"),
            },
            Entry {
                role: Role::User,
                item: ContentItem::text("b"),
            },
        ];
        let messages = aggregate(parley_core::IdentityAdapter, entries).unwrap();
        assert_eq!(messages, vec![Message::user().with_text("a").with_text("b")]);

        let bad = vec![Entry {
            role: Role::Tool,
            item: ContentItem::text("x"),
        }];
        assert!(aggregate(parley_core::IdentityAdapter, bad).is_err());
    }

    #[tokio::test]
    async fn test_replay_sse_transcript_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.sse");
        let transcript = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"m\",\"usage\":{\"input_tokens\":3}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"ok\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n\n",
        );
        tokio::fs::write(&path, transcript).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let bytes = futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from(content))]);
        print_events(decode_events(parse_sse_stream(bytes))).await.unwrap();

        let truncated = futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(
            b"data: {\"type\":\"message_start\",\"message\":{}}\n\n",
        ))]);
        assert!(print_events(decode_events(parse_sse_stream(truncated))).await.is_err());
    }
}
