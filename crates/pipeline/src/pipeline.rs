//! One delivery tick.

use std::sync::Arc;

use chrono::Utc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use billnotify_backend::{
    BackendClient, BackendError, CustomerDirectory, DeliveryRecorder, PendingWorkResolver,
    RecordOutcome, RetryPolicy,
};
use billnotify_channel::{Attachment, ChannelAdapter, ChannelError, ChannelSession};
use billnotify_core::{Destination, NotifierConfig};
use billnotify_invoicing::{
    Audience, Document, render_customer_message, render_sales_rep_message,
};
use billnotify_parties::DestinationResolver;

use crate::alert::{Alert, AlertSink, LogAlertSink};
use crate::attachments::{AttachmentSource, NoAttachments};
use crate::error::TickError;
use crate::ledger::DeliveryLedger;
use crate::report::{DeliveryAttempt, DeliveryOutcome, TickReport};

/// How processing a document affects the rest of the tick.
enum Flow {
    Continue,
    /// Stop sending; leave the remaining documents for the next tick.
    Defer(ChannelError),
    Abort(TickError),
}

/// A rendered message ready to go out.
struct Prepared {
    destination: Destination,
    text: String,
}

pub struct DeliveryPipeline<S: ChannelSession> {
    config: NotifierConfig,
    pending: PendingWorkResolver,
    customers: CustomerDirectory,
    recorder: DeliveryRecorder,
    channel: Arc<ChannelAdapter<S>>,
    resolver: DestinationResolver,
    attachments: Arc<dyn AttachmentSource>,
    alerts: Arc<dyn AlertSink>,
    ledger: DeliveryLedger,
    consecutive_deferrals: u32,
}

impl<S: ChannelSession> DeliveryPipeline<S> {
    /// Build a pipeline over one backend client and one channel.
    ///
    /// Fails when `config` does not validate.
    pub fn new(
        config: NotifierConfig,
        client: Arc<BackendClient>,
        channel: Arc<ChannelAdapter<S>>,
    ) -> Result<Self, TickError> {
        config.validate()?;
        let retry = RetryPolicy::default();
        Ok(Self {
            pending: PendingWorkResolver::new(client.clone(), config.page_size)
                .with_retry_policy(retry.clone()),
            customers: CustomerDirectory::new(client.clone()).with_retry_policy(retry.clone()),
            recorder: DeliveryRecorder::new(client).with_retry_policy(retry),
            resolver: DestinationResolver::new(config.phone_rules.clone()),
            channel,
            attachments: Arc::new(NoAttachments),
            alerts: Arc::new(LogAlertSink),
            ledger: DeliveryLedger::new(),
            consecutive_deferrals: 0,
            config,
        })
    }

    pub fn with_attachments(mut self, source: Arc<dyn AttachmentSource>) -> Self {
        self.attachments = source;
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = sink;
        self
    }

    /// Override the transport retry policy for every backend call.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.pending = self.pending.with_retry_policy(retry.clone());
        self.customers = self.customers.with_retry_policy(retry.clone());
        self.recorder = self.recorder.with_retry_policy(retry);
        self
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    /// Run one tick inside a span carrying a fresh `tick_id`.
    pub async fn run_tick(&mut self) -> Result<TickReport, TickError> {
        let tick_id = Uuid::now_v7();
        let span = info_span!("tick", %tick_id, mode = %self.config.delivery_mode);
        self.tick(tick_id).instrument(span).await
    }

    async fn tick(&mut self, tick_id: Uuid) -> Result<TickReport, TickError> {
        let mut report = TickReport::new(tick_id);
        let mut cursor = self
            .pending
            .list_pending(self.config.since_date, self.config.batch_limit)
            .excluding(self.ledger.settled());

        let Some(first) = cursor.next().await? else {
            debug!("no pending documents");
            return Ok(report);
        };

        if let Err(err) = self.channel.wait_ready(self.config.channel_ready_grace).await {
            return self.defer(report, &first, err);
        }
        self.channel_recovered();

        let mut next = Some(first);
        while let Some(doc) = next {
            let mut attempt = DeliveryAttempt::new(doc.id, doc.category().to_string());
            let flow = self.process(&doc, &mut attempt).await;
            let reached_channel = attempt.destination.is_some();
            report.attempts.push(attempt);

            match flow {
                Flow::Continue => {}
                Flow::Defer(err) => {
                    report.deferred_reason = Some(err.to_string());
                    self.channel_down(&err);
                    return Ok(report);
                }
                Flow::Abort(err) => return Err(err),
            }
            next = cursor.next().await?;
            // Pace only after the outcome is on record, and only when more follows.
            if reached_channel && next.is_some() && !self.config.inter_message_delay.is_zero() {
                tokio::time::sleep(self.config.inter_message_delay).await;
            }
        }

        Ok(report)
    }

    async fn process(&mut self, doc: &Document, attempt: &mut DeliveryAttempt) -> Flow {
        let attachment = self.attachment_for(doc).await;

        let prepared = match self.prepare(doc, attachment.is_some()).await {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(reason)) => return self.skip(doc, attempt, &reason).await,
            Err(err) => return self.lookup_failure(doc, attempt, err).await,
        };
        attempt.destination = Some(prepared.destination.to_string());
        attempt.text = Some(prepared.text.clone());
        attempt.attachment = attachment.as_ref().map(|a| a.file_name.clone());

        let sent = self
            .channel
            .send(&prepared.destination, &prepared.text, attachment.as_ref())
            .await;

        match sent {
            Ok(receipt) => {
                self.ledger.forget_failures(doc.id);
                self.record_sent(doc, attempt, &prepared.destination, receipt.timestamp)
                    .await
            }
            Err(err @ ChannelError::AuthLost(_)) => {
                attempt.error = Some(err.to_string());
                Flow::Abort(err.into())
            }
            Err(err) if err.defers_tick() => {
                attempt.error = Some(err.to_string());
                Flow::Defer(err)
            }
            Err(err) => self.send_failure(doc, attempt, err).await,
        }
    }

    /// Resolve and render. The inner `Err` is a reason to skip the document.
    async fn prepare(
        &self,
        doc: &Document,
        attached: bool,
    ) -> Result<Result<Prepared, String>, BackendError> {
        let mode = self.config.delivery_mode;
        let category = doc.category();

        let (production, destination, text) = match category.audience() {
            Audience::Customer => {
                let customer = self.customers.fetch(doc.customer_id).await?;
                let production = self.resolver.production_destination(&customer);
                let destination = match &self.config.test_destination {
                    Some(test) => self.resolver.resolve(&customer, mode, test),
                    None => production.clone(),
                };
                let text = render_customer_message(
                    doc,
                    &customer,
                    mode,
                    production.as_ref(),
                    self.config.templates.category_b,
                    attached,
                );
                (production, destination, text)
            }
            Audience::SalesRep => {
                let rep = &self.config.sales_rep;
                let production = self.resolver.sales_rep_destination(rep);
                let destination = match &self.config.test_destination {
                    Some(test) => self.resolver.resolve_sales_rep(rep, mode, test),
                    None => production.clone(),
                };
                let text = render_sales_rep_message(
                    doc,
                    &rep.name,
                    mode,
                    production.as_ref(),
                    self.config.templates.category_a,
                );
                (production, destination, text)
            }
        };

        debug!(
            document_id = %doc.id,
            %category,
            production = ?production.as_ref().map(Destination::as_str),
            "destination resolved"
        );
        Ok(destination
            .map(|destination| Prepared { destination, text })
            .ok_or_else(|| match category.audience() {
                Audience::Customer => "no usable mobile number on file".to_string(),
                Audience::SalesRep => "no usable sales rep phone configured".to_string(),
            }))
    }

    async fn attachment_for(&self, doc: &Document) -> Option<Attachment> {
        match self.attachments.fetch(doc).await {
            Ok(Some(attachment)) => Some(attachment),
            Ok(None) => {
                warn!(document_id = %doc.id, number = %doc.number, "no attachment found");
                None
            }
            Err(err) => {
                warn!(document_id = %doc.id, error = %err, "attachment unreadable; ignoring it");
                None
            }
        }
    }

    async fn record_sent(
        &mut self,
        doc: &Document,
        attempt: &mut DeliveryAttempt,
        destination: &Destination,
        at: chrono::DateTime<Utc>,
    ) -> Flow {
        if self.config.delivery_mode.is_test() && !self.config.record_test_deliveries {
            self.ledger.settle_unrecorded(doc.id);
            attempt.outcome = DeliveryOutcome::SentUnrecorded;
            info!(document_id = %doc.id, %destination, outcome = "sent_unrecorded", "test delivery not written back");
            return Flow::Continue;
        }

        match self.recorder.mark_sent(doc.id, destination, at).await {
            Ok(RecordOutcome::Recorded) => {
                attempt.outcome = DeliveryOutcome::Sent;
                Flow::Continue
            }
            Ok(RecordOutcome::AlreadyRecorded) => {
                warn!(document_id = %doc.id, %destination, outcome = "already_recorded", "delivery was already on record");
                attempt.outcome = DeliveryOutcome::AlreadyRecorded;
                Flow::Continue
            }
            Err(err) => {
                self.ledger.quarantine(doc.id);
                attempt.outcome = DeliveryOutcome::Dangling;
                attempt.error = Some(err.to_string());
                error!(document_id = %doc.id, %destination, error = %err, outcome = "dangling", "delivery sent but not recorded");
                self.alerts.raise(&Alert::DanglingSend {
                    document_id: doc.id,
                    destination: destination.clone(),
                    error: err.to_string(),
                });
                if err.aborts_tick() {
                    Flow::Abort(err.into())
                } else {
                    Flow::Continue
                }
            }
        }
    }

    async fn skip(&mut self, doc: &Document, attempt: &mut DeliveryAttempt, reason: &str) -> Flow {
        if self.config.delivery_mode.is_test() && !self.config.record_test_deliveries {
            self.ledger.settle_unrecorded(doc.id);
            attempt.outcome = DeliveryOutcome::Skipped;
            attempt.error = Some(reason.to_string());
            info!(document_id = %doc.id, reason, outcome = "skipped_unrecorded", "test skip not written back");
            return Flow::Continue;
        }

        match self.recorder.mark_skipped(doc.id, reason).await {
            Ok(_) => {
                self.ledger.forget_failures(doc.id);
                attempt.outcome = DeliveryOutcome::Skipped;
                attempt.error = Some(reason.to_string());
                Flow::Continue
            }
            Err(err) => self.backend_failure(doc, attempt, err),
        }
    }

    async fn send_failure(
        &mut self,
        doc: &Document,
        attempt: &mut DeliveryAttempt,
        err: ChannelError,
    ) -> Flow {
        let failures = self.ledger.record_failure(doc.id);
        warn!(document_id = %doc.id, failures, error = %err, outcome = "send_failed", "send failed");
        if failures < self.config.max_send_attempts {
            attempt.outcome = DeliveryOutcome::SendFailed;
            attempt.error = Some(err.to_string());
            return Flow::Continue;
        }
        let reason = format!("send failed {failures} times: {err}");
        self.skip(doc, attempt, &reason).await
    }

    /// A per-document lookup failed. Counts toward the same attempt bound as
    /// failed sends; transport and session errors abort the tick instead.
    async fn lookup_failure(
        &mut self,
        doc: &Document,
        attempt: &mut DeliveryAttempt,
        err: BackendError,
    ) -> Flow {
        if err.aborts_tick() {
            return self.backend_failure(doc, attempt, err);
        }
        let failures = self.ledger.record_failure(doc.id);
        if failures < self.config.max_send_attempts {
            return self.backend_failure(doc, attempt, err);
        }
        let reason = format!("customer lookup failed {failures} times: {err}");
        self.skip(doc, attempt, &reason).await
    }

    fn backend_failure(&self, doc: &Document, attempt: &mut DeliveryAttempt, err: BackendError) -> Flow {
        attempt.outcome = DeliveryOutcome::BackendFailed;
        attempt.error = Some(err.to_string());
        if err.aborts_tick() {
            return Flow::Abort(err.into());
        }
        warn!(document_id = %doc.id, error = %err, outcome = "backend_failed", "document skipped this tick");
        Flow::Continue
    }

    fn defer(&mut self, mut report: TickReport, doc: &Document, err: ChannelError) -> Result<TickReport, TickError> {
        if matches!(err, ChannelError::AuthLost(_)) {
            return Err(err.into());
        }
        report
            .attempts
            .push(DeliveryAttempt::new(doc.id, doc.category().to_string()));
        report.deferred_reason = Some(err.to_string());
        self.channel_down(&err);
        Ok(report)
    }

    fn channel_down(&mut self, err: &ChannelError) {
        self.consecutive_deferrals += 1;
        let threshold = self.config.channel_down.alert_after_ticks.max(1);
        warn!(consecutive = self.consecutive_deferrals, error = %err, "channel unavailable; tick deferred");
        if self.consecutive_deferrals % threshold == 0 {
            self.alerts.raise(&Alert::ChannelDown {
                consecutive_ticks: self.consecutive_deferrals,
                state: self.channel.state().to_string(),
            });
        }
    }

    fn channel_recovered(&mut self) {
        let threshold = self.config.channel_down.alert_after_ticks.max(1);
        if self.consecutive_deferrals >= threshold {
            self.alerts.raise(&Alert::ChannelRecovered {
                after_ticks: self.consecutive_deferrals,
            });
        }
        self.consecutive_deferrals = 0;
    }
}
