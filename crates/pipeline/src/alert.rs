//! Operator alerts. Delivering them (mail, pager, chat) happens elsewhere.

use tracing::{error, info};

use billnotify_core::{Destination, DocumentId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// The channel has not been ready for this many ticks in a row.
    ChannelDown { consecutive_ticks: u32, state: String },
    /// The channel is ready again after a `ChannelDown` alert.
    ChannelRecovered { after_ticks: u32 },
    /// A message went out but its delivery could not be recorded. The
    /// document is quarantined and needs manual reconciliation.
    DanglingSend {
        document_id: DocumentId,
        destination: Destination,
        error: String,
    },
}

pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: &Alert);
}

/// Writes alerts to the log at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: &Alert) {
        match alert {
            Alert::ChannelDown {
                consecutive_ticks,
                state,
            } => error!(consecutive_ticks, %state, alert = "channel_down", "messaging channel unavailable"),
            Alert::ChannelRecovered { after_ticks } => {
                info!(after_ticks, alert = "channel_recovered", "messaging channel recovered")
            }
            Alert::DanglingSend {
                document_id,
                destination,
                error,
            } => error!(
                %document_id,
                %destination,
                %error,
                alert = "dangling_send",
                "message sent but delivery not recorded; reconcile manually"
            ),
        }
    }
}
