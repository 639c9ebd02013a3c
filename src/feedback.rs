//! Decision channel for recoverable faults.
//!
//! Pipeline code asks the [`FeedbackBroker`] it was constructed with and
//! gets a synchronous answer. Unattended brokers answer from a fixed
//! policy; attended brokers forward to the single current subscriber and
//! block until it replies.

use std::fmt;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use tracing::{info, warn};

/// Answer sets a request may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOptions {
    Ok,
    OkCancel,
    YesNo,
    YesNoCancel,
    RetryCancel,
    AbortRetryIgnore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackResult {
    Ok,
    Cancel,
    Abort,
    Retry,
    Ignore,
    Yes,
    No,
}

impl FeedbackOptions {
    pub fn choices(self) -> &'static [FeedbackResult] {
        use FeedbackResult::*;
        match self {
            FeedbackOptions::Ok => &[Ok],
            FeedbackOptions::OkCancel => &[Ok, Cancel],
            FeedbackOptions::YesNo => &[Yes, No],
            FeedbackOptions::YesNoCancel => &[Yes, No, Cancel],
            FeedbackOptions::RetryCancel => &[Retry, Cancel],
            FeedbackOptions::AbortRetryIgnore => &[Abort, Retry, Ignore],
        }
    }

    /// Answer used when nobody is asked.
    pub fn default_result(self) -> FeedbackResult {
        match self {
            FeedbackOptions::Ok | FeedbackOptions::OkCancel => FeedbackResult::Ok,
            FeedbackOptions::YesNo | FeedbackOptions::YesNoCancel => FeedbackResult::Yes,
            FeedbackOptions::RetryCancel => FeedbackResult::Cancel,
            FeedbackOptions::AbortRetryIgnore => FeedbackResult::Ignore,
        }
    }

    pub fn allows(self, result: FeedbackResult) -> bool {
        self.choices().contains(&result)
    }

    fn prompt(self) -> String {
        self.choices()
            .iter()
            .map(|choice| {
                let label = choice.to_string();
                let (first, rest) = label.split_at(1);
                format!("[{first}]{rest}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for FeedbackResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FeedbackResult::Ok => "Ok",
            FeedbackResult::Cancel => "Cancel",
            FeedbackResult::Abort => "Abort",
            FeedbackResult::Retry => "Retry",
            FeedbackResult::Ignore => "Ignore",
            FeedbackResult::Yes => "Yes",
            FeedbackResult::No => "No",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRequest {
    pub message: String,
    pub title: String,
    pub options: FeedbackOptions,
}

/// Something that can answer a request, usually a presentation shell.
pub trait FeedbackHandler: Send + Sync {
    fn handle(&self, request: &FeedbackRequest) -> FeedbackResult;
}

/// Routes decision requests to the current subscriber or the default policy.
pub struct FeedbackBroker {
    unattended: bool,
    subscriber: Mutex<Option<Arc<dyn FeedbackHandler>>>,
}

impl FeedbackBroker {
    pub fn unattended() -> Self {
        Self {
            unattended: true,
            subscriber: Mutex::new(None),
        }
    }

    pub fn attended(handler: Arc<dyn FeedbackHandler>) -> Self {
        Self {
            unattended: false,
            subscriber: Mutex::new(Some(handler)),
        }
    }

    pub fn is_unattended(&self) -> bool {
        self.unattended
    }

    /// Installs `handler`, replacing any previous subscriber.
    pub fn subscribe(&self, handler: Arc<dyn FeedbackHandler>) {
        *self
            .subscriber
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }

    pub fn unsubscribe(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn request(
        &self,
        message: impl Into<String>,
        title: impl Into<String>,
        options: FeedbackOptions,
    ) -> FeedbackResult {
        let request = FeedbackRequest {
            message: message.into(),
            title: title.into(),
            options,
        };

        let handler = if self.unattended {
            None
        } else {
            self.subscriber
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()
        };

        let result = match handler {
            Some(handler) => {
                let answer = handler.handle(&request);
                if options.allows(answer) {
                    answer
                } else {
                    warn!(%answer, ?options, "subscriber answered outside the offered options");
                    options.default_result()
                }
            }
            None => options.default_result(),
        };

        info!(title = %request.title, message = %request.message, %result, "feedback decision");
        result
    }
}

impl fmt::Debug for FeedbackBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackBroker")
            .field("unattended", &self.unattended)
            .finish_non_exhaustive()
    }
}

/// A request waiting for an answer from another thread.
pub struct PendingDecision {
    pub request: FeedbackRequest,
    respond: Sender<FeedbackResult>,
}

impl PendingDecision {
    pub fn respond(self, result: FeedbackResult) {
        let _ = self.respond.send(result);
    }
}

/// Forwards requests to a receiver owned by, e.g., a UI thread.
pub struct ChannelFeedback {
    tx: Sender<PendingDecision>,
}

impl ChannelFeedback {
    pub fn new() -> (Self, Receiver<PendingDecision>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl FeedbackHandler for ChannelFeedback {
    fn handle(&self, request: &FeedbackRequest) -> FeedbackResult {
        let (respond, answer) = bounded(1);
        let pending = PendingDecision {
            request: request.clone(),
            respond,
        };
        if self.tx.send(pending).is_err() {
            warn!("feedback receiver is gone, using default policy");
            return request.options.default_result();
        }
        answer
            .recv()
            .unwrap_or_else(|_| request.options.default_result())
    }
}

/// Prompts on a text terminal.
pub struct ConsoleFeedback {
    io: Mutex<(Box<dyn BufRead + Send>, Box<dyn Write + Send>)>,
}

impl ConsoleFeedback {
    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }

    pub fn stdio() -> Self {
        Self::new(
            Box::new(std::io::BufReader::new(std::io::stdin())),
            Box::new(std::io::stderr()),
        )
    }
}

fn parse_choice(line: &str, options: FeedbackOptions) -> Option<FeedbackResult> {
    let key = line.trim().chars().next()?.to_ascii_uppercase();
    options
        .choices()
        .iter()
        .copied()
        .find(|choice| choice.to_string().starts_with(key))
}

impl FeedbackHandler for ConsoleFeedback {
    fn handle(&self, request: &FeedbackRequest) -> FeedbackResult {
        let mut io = self
            .io
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (input, output) = &mut *io;
        let prompt = request.options.prompt();

        let _ = writeln!(output);
        let _ = writeln!(output, "{}: {}", request.title, request.message);
        loop {
            let _ = writeln!(output, "{prompt}");
            let _ = output.flush();
            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => return request.options.default_result(),
                Ok(_) => {
                    if let Some(choice) = parse_choice(&line, request.options) {
                        return choice;
                    }
                }
            }
        }
    }
}
