//! Build notification emails: rendering with minijinja, delivery via sendmail.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use minijinja::{Environment, context};
use tracing::{debug, info, instrument};

use crate::core::summary::{FailureRecord, SuccessRecord, Summary};
use crate::io::config::MailConfig;
use crate::io::process::{CommandSpec, run_checked};

const SUCCESS_TEMPLATE: &str = include_str!("templates/success.html");
const FAILURE_TEMPLATE: &str = include_str!("templates/failure.html");

/// A rendered HTML email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

impl Email {
    /// Message text with headers, as accepted by `sendmail -t`.
    pub fn to_message(&self) -> String {
        let mut msg = String::new();
        msg.push_str(&format!("From: {}\n", self.from));
        msg.push_str(&format!("To: {}\n", self.to.join(", ")));
        if !self.cc.is_empty() {
            msg.push_str(&format!("Cc: {}\n", self.cc.join(", ")));
        }
        msg.push_str(&format!("Subject: {}\n", self.subject));
        msg.push_str("MIME-Version: 1.0\n");
        msg.push_str("Content-Type: text/html; charset=UTF-8\n");
        msg.push('\n');
        msg.push_str(&self.html_body);
        if !msg.ends_with('\n') {
            msg.push('\n');
        }
        msg
    }
}

pub fn success_subject(environment: &str) -> String {
    format!("{} Release Notes!", environment.to_uppercase())
}

pub fn failure_subject(environment: &str) -> String {
    format!("{} Build Failed!", environment.to_uppercase())
}

/// Template engine wrapper around minijinja.
///
/// Template names end in `.html`, so interpolated values are HTML-escaped.
pub struct MailTemplates {
    env: Environment<'static>,
}

impl MailTemplates {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("success.html", SUCCESS_TEMPLATE)
            .context("load success template")?;
        env.add_template("failure.html", FAILURE_TEMPLATE)
            .context("load failure template")?;
        Ok(Self { env })
    }

    pub fn render_success(&self, record: &SuccessRecord) -> Result<String> {
        let template = self.env.get_template("success.html")?;
        let rendered = template
            .render(context! {
                environment => record.environment.to_uppercase(),
                stories => &record.stories,
                commits => &record.commits,
            })
            .context("render success email")?;
        Ok(rendered)
    }

    pub fn render_failure(&self, record: &FailureRecord) -> Result<String> {
        let template = self.env.get_template("failure.html")?;
        let rendered = template
            .render(context! { errors => &record.errors })
            .context("render failure email")?;
        Ok(rendered)
    }
}

/// Delivers a rendered email.
pub trait Mailer {
    fn send(&self, email: &Email) -> Result<()>;
}

/// [`Mailer`] that pipes the message to `sendmail -t -i`.
#[derive(Debug, Clone)]
pub struct SendmailMailer {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl SendmailMailer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Mailer for SendmailMailer {
    #[instrument(skip_all, fields(subject = %email.subject))]
    fn send(&self, email: &Email) -> Result<()> {
        let spec = CommandSpec::new(&self.program)
            .args(["-t", "-i"])
            .stdin(email.to_message())
            .timeout(self.timeout);
        run_checked(&spec).with_context(|| format!("send mail via {}", self.program.display()))?;
        info!(recipients = email.to.len() + email.cc.len(), "mail handed to sendmail");
        Ok(())
    }
}

/// Sends the final notification for a batch of work orders.
pub trait Notifier {
    fn notify(&self, environment: &str, summary: &Summary) -> Result<()>;
}

/// [`Notifier`] that renders an HTML email and hands it to a [`Mailer`].
pub struct MailNotifier<M> {
    templates: MailTemplates,
    mailer: M,
    config: MailConfig,
}

impl<M: Mailer> MailNotifier<M> {
    pub fn new(config: MailConfig, mailer: M) -> Result<Self> {
        Ok(Self {
            templates: MailTemplates::new()?,
            mailer,
            config,
        })
    }

    /// Build the email for `summary` without sending it.
    pub fn compose(&self, environment: &str, summary: &Summary) -> Result<Email> {
        let (to, subject, html_body) = match summary {
            Summary::Success(record) => (
                &self.config.success_to,
                success_subject(environment),
                self.templates.render_success(record)?,
            ),
            Summary::Failure(record) => (
                &self.config.failure_to,
                failure_subject(environment),
                self.templates.render_failure(record)?,
            ),
        };
        if to.is_empty() {
            bail!("no recipients configured for \"{subject}\"");
        }
        Ok(Email {
            from: self.config.from.clone(),
            to: to.clone(),
            cc: self.config.cc.clone(),
            subject,
            html_body,
        })
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }
}

impl<M: Mailer> Notifier for MailNotifier<M> {
    fn notify(&self, environment: &str, summary: &Summary) -> Result<()> {
        let email = self.compose(environment, summary)?;
        debug!(subject = %email.subject, "sending notification");
        self.mailer.send(&email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::summary::{ServiceCommits, ServiceError};
    use crate::core::types::CommitInfo;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<Email>>,
    }

    impl Mailer for RecordingMailer {
        fn send(&self, email: &Email) -> Result<()> {
            self.sent.lock().expect("lock").push(email.clone());
            Ok(())
        }
    }

    fn config() -> MailConfig {
        MailConfig {
            from: "services@example.com".to_string(),
            success_to: vec!["testers@example.com".to_string()],
            failure_to: vec!["oncall@example.com".to_string()],
            cc: vec!["team@example.com".to_string()],
            ..MailConfig::default()
        }
    }

    fn success() -> Summary {
        Summary::Success(SuccessRecord {
            environment: "qa".to_string(),
            stories: vec!["ABC-1".to_string(), "ABC-2".to_string()],
            commits: vec![ServiceCommits {
                service: "billing".to_string(),
                environment: "qa".to_string(),
                commit_info: vec![CommitInfo {
                    description: "Fix <rounding> & totals".to_string(),
                    commit: "0f69a1de".to_string(),
                    author: "dev".to_string(),
                    date: "July 05, 2016 at 10:07:07 AM -0400".to_string(),
                }],
            }],
        })
    }

    #[test]
    fn success_email_lists_stories_and_escaped_commits() {
        let notifier = MailNotifier::new(config(), RecordingMailer::default()).expect("notifier");
        notifier.notify("qa", &success()).expect("notify");

        let sent = notifier.mailer().sent.lock().expect("lock");
        let email = &sent[0];
        assert_eq!(email.subject, "QA Release Notes!");
        assert_eq!(email.to, vec!["testers@example.com"]);
        assert!(email.html_body.contains("released to QA."));
        assert!(email.html_body.contains("ABC-2"));
        assert!(email.html_body.contains("Release details for billing in qa."));
        assert!(email.html_body.contains("Fix &lt;rounding&gt; &amp; totals"));
    }

    #[test]
    fn failure_email_shows_error_or_none() {
        let summary = Summary::Failure(FailureRecord {
            errors: vec![
                ServiceError {
                    service: "svc".to_string(),
                    environment: "prod".to_string(),
                    error: Some("[svc] fetch failed in [/ws/src/svc]".to_string()),
                },
                ServiceError {
                    service: "other".to_string(),
                    environment: "prod".to_string(),
                    error: None,
                },
            ],
        });
        let notifier = MailNotifier::new(config(), RecordingMailer::default()).expect("notifier");

        let email = notifier.compose("prod", &summary).expect("compose");

        assert_eq!(email.subject, "PROD Build Failed!");
        assert_eq!(email.to, vec!["oncall@example.com"]);
        assert!(email.html_body.contains("The build for svc in prod has failed."));
        assert!(email.html_body.contains("[svc] fetch failed in ["));
        assert!(email.html_body.contains("<td>none</td>"));
    }

    #[test]
    fn missing_recipients_is_an_error() {
        let mut cfg = config();
        cfg.success_to.clear();
        let notifier = MailNotifier::new(cfg, RecordingMailer::default()).expect("notifier");
        let err = notifier.notify("qa", &success()).expect_err("no recipients");
        assert!(err.to_string().contains("QA Release Notes!"));
    }

    #[test]
    fn message_has_headers_then_body() {
        let email = Email {
            from: "a@example.com".to_string(),
            to: vec!["b@example.com".to_string(), "c@example.com".to_string()],
            cc: Vec::new(),
            subject: "QA Release Notes!".to_string(),
            html_body: "<p>hi</p>".to_string(),
        };
        let msg = email.to_message();
        assert!(msg.starts_with("From: a@example.com\nTo: b@example.com, c@example.com\nSubject:"));
        assert!(!msg.contains("Cc:"));
        assert!(msg.ends_with("\n\n<p>hi</p>\n"));
    }

    #[cfg(unix)]
    #[test]
    fn sendmail_mailer_pipes_message_to_program() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let captured = temp.path().join("captured.eml");
        let script = temp.path().join("fake-sendmail");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ncat > '{}'\n", captured.display()),
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let notifier =
            MailNotifier::new(config(), SendmailMailer::new(&script)).expect("notifier");
        notifier.notify("qa", &success()).expect("notify");

        let message = std::fs::read_to_string(&captured).expect("captured");
        assert!(message.contains("Subject: QA Release Notes!\n"));
        assert!(message.contains("Cc: team@example.com\n"));
    }
}
