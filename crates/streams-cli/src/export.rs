use std::io;
use std::time::Duration;

use anyhow::{bail, Context};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Aggregate trade event as published on `<symbol>@aggTrade`.
///
/// Field names are the one-letter keys of the feed when decoding and the
/// CSV column names when encoding.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AggTrade {
    #[serde(rename(deserialize = "e", serialize = "Event"))]
    pub event: String,
    #[serde(rename(deserialize = "E", serialize = "Time"))]
    pub time: i64,
    #[serde(rename(deserialize = "s", serialize = "Symbol"))]
    pub symbol: String,
    #[serde(rename(deserialize = "a", serialize = "AggTradeID"))]
    pub agg_trade_id: i64,
    #[serde(rename(deserialize = "p", serialize = "Price"))]
    pub price: String,
    #[serde(rename(deserialize = "q", serialize = "Quantity"))]
    pub quantity: String,
    #[serde(rename(deserialize = "f", serialize = "FirstBreakdownTradeID"))]
    pub first_trade_id: i64,
    #[serde(rename(deserialize = "l", serialize = "LastBreakdownTradeID"))]
    pub last_trade_id: i64,
    #[serde(rename(deserialize = "T", serialize = "TradeTime"))]
    pub trade_time: i64,
    #[serde(rename(deserialize = "m", serialize = "IsBuyerMaker"))]
    pub is_buyer_maker: bool,
}

impl AggTrade {
    pub const HEADER: [&'static str; 10] = [
        "Event",
        "Time",
        "Symbol",
        "AggTradeID",
        "Price",
        "Quantity",
        "FirstBreakdownTradeID",
        "LastBreakdownTradeID",
        "TradeTime",
        "IsBuyerMaker",
    ];
}

#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub url: String,
    pub connect_timeout: Duration,
    pub message_timeout: Duration,
}

/// Replay `options.url` and write every trade to `out` as CSV.
///
/// Ends successfully on a normal close from the server or when `cancel`
/// fires. Returns the number of trades written.
pub async fn export<W: io::Write>(
    options: &ExportOptions,
    out: W,
    cancel: &CancellationToken,
) -> anyhow::Result<u64> {
    let (mut ws, _) = timeout(options.connect_timeout, connect_async(options.url.as_str()))
        .await
        .with_context(|| format!("connect to {} timed out", options.url))?
        .with_context(|| format!("connect to {}", options.url))?;
    info!(url = %options.url, "export connected");

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(AggTrade::HEADER)?;

    let mut written = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                let frame = CloseFrame { code: CloseCode::Normal, reason: "good bye".into() };
                if let Err(e) = ws.close(Some(frame)).await {
                    debug!(error = %e, "close handshake failed");
                }
                break;
            }
            next = timeout(options.message_timeout, ws.next()) => next,
        };

        let message = match next {
            Err(_) => bail!("no message within {:?}", options.message_timeout),
            Ok(None) => bail!("connection ended without a close frame"),
            Ok(Some(message)) => message.context("read replay message")?,
        };

        let trade: AggTrade = match message {
            Message::Text(text) => serde_json::from_str(&text).context("decode aggregate trade")?,
            Message::Binary(data) => serde_json::from_slice(&data).context("decode aggregate trade")?,
            Message::Close(Some(frame)) if frame.code == CloseCode::Normal => {
                debug!(reason = %frame.reason, "server finished replay");
                break;
            }
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("{} {}", f.code, f.reason))
                    .unwrap_or_else(|| "no status".into());
                bail!("replay closed abnormally: {reason}");
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };
        writer.serialize(&trade)?;
        written += 1;
    }

    writer.flush()?;
    if written == 0 {
        warn!(url = %options.url, "replay contained no trades");
    }
    Ok(written)
}
