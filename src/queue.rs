//! Outbound send queue.
//!
//! [`SendQueue`] is a handle to a single consumer task that drains jobs in
//! arrival order. A job is fully resolved (sent, or failed after its last
//! attempt) before the next job's first attempt, so a retrying job holds up
//! everything behind it. The consumer is also the only path for reading
//! stored messages, which keeps one transaction on the line at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::commands::{DEFAULT_SEND_TIMEOUT, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use crate::protocol::{
    AtCommand, MessageFormat, ReadResponse, SubmitPdu, TextEncoding, build_submit_pdu_with,
    gsm7_single_part, parse_read_response, parse_send_reference,
};
use crate::session::ModemSession;
use crate::transport::Transport;
use crate::types::{JobStatus, OutboundJob, SendOutcome};

/// Default number of attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before retrying a failed attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Default minimum spacing between sends.
pub const DEFAULT_SEND_COOLDOWN: Duration = Duration::from_secs(2);

const MIN_NUMBER_DIGITS: usize = 7;
const MAX_NUMBER_DIGITS: usize = 15;

/// How destinations are normalized before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberPlan {
    /// Operator service codes sent as-is.
    pub short_codes: Vec<String>,
    /// Country code prefixed to local numbers, without `+`.
    pub country_code: Option<String>,
    /// Digit count of a local subscriber number.
    pub local_number_digits: usize,
}

impl Default for NumberPlan {
    fn default() -> Self {
        Self {
            short_codes: vec!["0800".into()],
            country_code: None,
            local_number_digits: 8,
        }
    }
}

impl NumberPlan {
    /// Returns true if `number` is a configured short code.
    #[must_use]
    pub fn is_short_code(&self, number: &str) -> bool {
        self.short_codes.iter().any(|code| code == number)
    }

    /// Normalizes a destination.
    ///
    /// Short codes pass through untouched. Anything else loses spaces,
    /// dashes and parentheses, gets the country code when it is a local
    /// number, and must have between 7 and 15 digits.
    pub fn normalize(&self, raw: &str) -> Result<String> {
        let trimmed = raw.trim();
        if self.is_short_code(trimmed) {
            return Ok(trimmed.to_owned());
        }

        let invalid = || Error::InvalidNumber {
            number: raw.to_owned(),
        };
        let cleaned: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
            .collect();
        let (international, digits) = match cleaned.strip_prefix('+') {
            Some(digits) => (true, digits),
            None => (false, cleaned.as_str()),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let number = match &self.country_code {
            _ if international => format!("+{digits}"),
            Some(code) if digits.len() == self.local_number_digits => format!("+{code}{digits}"),
            Some(code)
                if digits.len() == code.len() + self.local_number_digits
                    && digits.starts_with(code.as_str()) =>
            {
                format!("+{digits}")
            }
            _ => digits.to_owned(),
        };

        let count = number.trim_start_matches('+').len();
        if !(MIN_NUMBER_DIGITS..=MAX_NUMBER_DIGITS).contains(&count) {
            return Err(invalid());
        }
        Ok(number)
    }
}

/// Queue settings.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// SMSC number; empty uses the one stored on the SIM.
    pub smsc: String,
    /// PDU text encoding.
    pub encoding: TextEncoding,
    /// Attempts per job.
    pub max_attempts: u32,
    /// Delay before retrying a failed attempt.
    pub retry_backoff: Duration,
    /// Minimum spacing between sends.
    pub send_cooldown: Duration,
    /// Deadline for ordinary commands.
    pub command_timeout: Duration,
    /// Deadline for the message body of a send.
    pub send_timeout: Duration,
    /// Delete stored messages once read.
    pub delete_after_read: bool,
    /// Destination normalization.
    pub numbering: NumberPlan,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            smsc: String::new(),
            encoding: TextEncoding::Ucs2,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            send_cooldown: DEFAULT_SEND_COOLDOWN,
            command_timeout: DEFAULT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            delete_after_read: true,
            numbering: NumberPlan::default(),
        }
    }
}

enum Work {
    Send {
        job: OutboundJob,
        reply: oneshot::Sender<SendOutcome>,
    },
    Read {
        index: u32,
        reply: oneshot::Sender<Result<Option<ReadResponse>>>,
    },
}

impl Work {
    fn abandon(self) {
        match self {
            Self::Send { job, reply } => {
                tracing::warn!(destination = %job.destination, "dropping queued job on shutdown");
                let _ = reply.send(SendOutcome::failed(format!(
                    "SMS to {} not sent: send queue stopped",
                    job.destination
                )));
            }
            Self::Read { reply, .. } => {
                let _ = reply.send(Err(Error::QueueClosed));
            }
        }
    }
}

/// Resolves once the job reaches a terminal state.
pub struct JobTicket {
    rx: oneshot::Receiver<SendOutcome>,
}

impl JobTicket {
    /// Waits for the job's outcome.
    pub async fn outcome(self) -> SendOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::failed("send queue stopped before the job resolved"),
        }
    }
}

/// Handle to the send queue.
#[derive(Clone)]
pub struct SendQueue {
    tx: mpsc::UnboundedSender<Work>,
    max_attempts: u32,
}

impl SendQueue {
    /// Spawns the consumer for `session` and returns its handle.
    ///
    /// The consumer stops once `shutdown` turns true; an attempt already on
    /// the wire finishes first.
    pub fn start<T: Transport + 'static>(
        session: Arc<ModemSession<T>>,
        options: QueueOptions,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            max_attempts: options.max_attempts,
        };
        let consumer = Consumer {
            session,
            options,
            shutdown,
            last_send: None,
        };
        (queue, tokio::spawn(consumer.run(rx)))
    }

    /// Appends a job and returns without waiting for it.
    ///
    /// The ticket may be dropped; the job is still sent.
    pub fn enqueue(
        &self,
        destination: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<JobTicket> {
        let job = OutboundJob::new(destination, payload, self.max_attempts);
        tracing::debug!(destination = %job.destination, "job queued");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Work::Send { job, reply })
            .map_err(|_| Error::QueueClosed)?;
        Ok(JobTicket { rx })
    }

    /// Reads the message stored at `index`, in turn with queued sends.
    ///
    /// Returns `None` if the slot is empty.
    pub async fn read_message(&self, index: u32) -> Result<Option<ReadResponse>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Work::Read { index, reply })
            .map_err(|_| Error::QueueClosed)?;
        rx.await.map_err(|_| Error::QueueClosed)?
    }
}

/// A job ready for the wire.
enum Prepared {
    Pdu(SubmitPdu),
    Text { destination: String, text: String },
}

/// Resolves once `shutdown` turns true or its sender is dropped.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

struct Consumer<T> {
    session: Arc<ModemSession<T>>,
    options: QueueOptions,
    shutdown: watch::Receiver<bool>,
    last_send: Option<Instant>,
}

impl<T: Transport + 'static> Consumer<T> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Work>) {
        loop {
            let work = tokio::select! {
                biased;
                () = stopped(&mut self.shutdown) => break,
                work = rx.recv() => match work {
                    Some(work) => work,
                    None => break,
                },
            };

            match work {
                Work::Send { job, reply } => {
                    let outcome = self.send(job).await;
                    let _ = reply.send(outcome);
                }
                Work::Read { index, reply } => {
                    let _ = reply.send(self.read(index).await);
                }
            }
        }

        rx.close();
        while let Ok(work) = rx.try_recv() {
            work.abandon();
        }
        tracing::debug!("send queue stopped");
    }

    async fn send(&mut self, mut job: OutboundJob) -> SendOutcome {
        let destination = job.destination.clone();
        let prepared = match self.prepare(&job) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(%destination, error = %e, "rejecting job");
                job.finish(false);
                return SendOutcome::failed(format!(
                    "cannot send SMS to {destination}: {}",
                    e.summary()
                ));
            }
        };

        loop {
            if !self.wait_turn().await {
                job.finish(false);
                return SendOutcome::failed(format!(
                    "SMS to {destination} not sent: send queue stopped"
                ));
            }

            let attempt = job.begin_attempt();
            let result = self.transmit(&prepared).await;
            match result {
                Ok(reference) => {
                    self.last_send = Some(Instant::now());
                    job.finish(true);
                    tracing::info!(%destination, attempt, reference, "SMS sent");
                    return SendOutcome::sent(format!("SMS sent to {destination}"));
                }
                Err(Error::SessionNotReady { state }) => {
                    // Never reached the modem
                    tracing::debug!(%destination, %state, "session not ready, waiting");
                    job.retract_attempt();
                }
                Err(e) => {
                    self.last_send = Some(Instant::now());
                    if !job.can_retry() {
                        job.finish(false);
                        tracing::error!(
                            %destination,
                            attempts = job.attempts,
                            error = %e,
                            "SMS failed"
                        );
                        return SendOutcome::failed(format!(
                            "failed to send SMS to {destination} after {} attempts: {}",
                            job.attempts,
                            e.summary()
                        ));
                    }
                    job.status = JobStatus::Pending;
                    tracing::warn!(
                        %destination,
                        attempt,
                        max_attempts = job.max_attempts,
                        error = %e,
                        "send attempt failed, retrying"
                    );
                    if !self.pause(self.options.retry_backoff).await {
                        job.finish(false);
                        return SendOutcome::failed(format!(
                            "SMS to {destination} not sent: send queue stopped"
                        ));
                    }
                }
            }
        }
    }

    fn prepare(&self, job: &OutboundJob) -> Result<Prepared> {
        let destination = self.options.numbering.normalize(&job.destination)?;
        match self.session.message_format() {
            MessageFormat::Pdu => build_submit_pdu_with(
                &self.options.smsc,
                &destination,
                &job.payload,
                self.options.encoding,
            )
            .map(Prepared::Pdu),
            MessageFormat::Text => {
                // The modem is set to IRA, which only carries ASCII
                if let Some(character) = job.payload.chars().find(|c| !c.is_ascii()) {
                    return Err(Error::Unencodable { character });
                }
                gsm7_single_part(&job.payload)?;
                Ok(Prepared::Text {
                    destination,
                    text: job.payload.clone(),
                })
            }
        }
    }

    /// Runs the `AT+CMGS` exchange and returns the message reference.
    async fn transmit(&self, prepared: &Prepared) -> Result<Option<u8>> {
        let timeout = self.options.command_timeout;
        let (start, body) = match prepared {
            Prepared::Pdu(pdu) => (
                AtCommand::send_length(pdu.command_length(), timeout),
                AtCommand::send_body(pdu.pdu(), self.options.send_timeout),
            ),
            Prepared::Text { destination, text } => (
                AtCommand::send_address(destination, timeout),
                AtCommand::send_body(text, self.options.send_timeout),
            ),
        };

        match self.session.send_command(&start).await {
            Ok(_) => {}
            Err(e @ Error::SessionNotReady { .. }) => return Err(e),
            Err(e) => {
                // The modem may still be sitting at the prompt
                if let Err(cancel) = self.session.cancel_prompt().await {
                    tracing::debug!(error = %cancel, "cannot cancel send prompt");
                }
                return Err(e);
            }
        }
        let response = self.session.send_command(&body).await?;
        Ok(parse_send_reference(&response))
    }

    async fn read(&mut self, index: u32) -> Result<Option<ReadResponse>> {
        tokio::select! {
            biased;
            () = stopped(&mut self.shutdown) => return Err(Error::QueueClosed),
            () = self.session.wait_until_ready() => {}
        }

        let timeout = self.options.command_timeout;
        let response = self
            .session
            .send_command(&AtCommand::read_message(index, timeout))
            .await?;
        let message = parse_read_response(&response);
        if message.is_none() {
            tracing::debug!(index, "storage slot empty");
        } else if self.options.delete_after_read {
            let delete = AtCommand::delete_message(index, timeout);
            if let Err(e) = self.session.send_command(&delete).await {
                tracing::warn!(index, error = %e, "failed to delete stored message");
            }
        }
        Ok(message)
    }

    /// Waits out the cooldown and for a ready session. False on shutdown.
    async fn wait_turn(&mut self) -> bool {
        if let Some(last) = self.last_send {
            let until = last + self.options.send_cooldown;
            tokio::select! {
                biased;
                () = stopped(&mut self.shutdown) => return false,
                () = tokio::time::sleep_until(until) => {}
            }
        }
        tokio::select! {
            biased;
            () = stopped(&mut self.shutdown) => false,
            () = self.session.wait_until_ready() => true,
        }
    }

    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = stopped(&mut self.shutdown) => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}
