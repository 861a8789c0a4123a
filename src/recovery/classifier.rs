//! Error classification.
//!
//! Maps an error (message, optional HTTP status, optional page content) to
//! the best-scoring known pattern with a confidence in [0, 1]. Status codes
//! are the strongest signal; content and message substrings refine or
//! replace them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPattern {
    Blocked,
    RateLimited,
    Captcha,
    Timeout,
    Connection,
    LayoutChanged,
    AuthRequired,
    NotFound,
    ServerError,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub pattern: ErrorPattern,
    pub confidence: f64,
}

/// What the classifier gets to look at
#[derive(Debug, Default)]
pub struct ErrorContext<'a> {
    pub message: &'a str,
    pub http_status: Option<u16>,
    pub page_content: Option<&'a str>,
}

struct PatternRule {
    pattern: ErrorPattern,
    statuses: &'static [u16],
    message_markers: &'static [&'static str],
    content_markers: &'static [&'static str],
}

const RULES: &[PatternRule] = &[
    PatternRule {
        pattern: ErrorPattern::Captcha,
        statuses: &[],
        message_markers: &["captcha"],
        content_markers: &["captcha", "g-recaptcha", "hcaptcha", "cf-challenge"],
    },
    PatternRule {
        pattern: ErrorPattern::RateLimited,
        statuses: &[429],
        message_markers: &["rate limit", "too many requests", "429"],
        content_markers: &["too many requests", "rate limited"],
    },
    PatternRule {
        pattern: ErrorPattern::Blocked,
        statuses: &[403],
        message_markers: &["forbidden", "access denied", "blocked"],
        content_markers: &["access denied", "has been blocked", "unusual traffic"],
    },
    PatternRule {
        pattern: ErrorPattern::AuthRequired,
        statuses: &[401],
        message_markers: &["unauthorized", "login required"],
        content_markers: &["please log in", "sign in to continue"],
    },
    PatternRule {
        pattern: ErrorPattern::NotFound,
        statuses: &[404, 410],
        message_markers: &["not found", "404"],
        content_markers: &["page not found"],
    },
    PatternRule {
        pattern: ErrorPattern::ServerError,
        statuses: &[500, 502, 503, 504],
        message_markers: &["internal server error", "bad gateway", "service unavailable"],
        content_markers: &[],
    },
    PatternRule {
        pattern: ErrorPattern::Timeout,
        statuses: &[408],
        message_markers: &["timeout", "timed out", "deadline"],
        content_markers: &[],
    },
    PatternRule {
        pattern: ErrorPattern::Connection,
        statuses: &[],
        message_markers: &[
            "connection refused",
            "connection reset",
            "dns",
            "unreachable",
            "net::err",
            "eof",
        ],
        content_markers: &[],
    },
    PatternRule {
        pattern: ErrorPattern::LayoutChanged,
        statuses: &[],
        message_markers: &["selector", "matched nothing", "no field matched"],
        content_markers: &[],
    },
];

#[derive(Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Score every pattern; the highest wins, Unknown when nothing scores
    #[must_use]
    pub fn classify(&self, ctx: &ErrorContext<'_>) -> Classification {
        let message = ctx.message.to_lowercase();
        let content = ctx.page_content.map(str::to_lowercase);

        let mut best = Classification {
            pattern: ErrorPattern::Unknown,
            confidence: 0.0,
        };

        for rule in RULES {
            let mut score: f64 = 0.0;
            if let Some(status) = ctx.http_status
                && rule.statuses.contains(&status)
            {
                score += 0.6;
            }
            if rule
                .message_markers
                .iter()
                .any(|marker| message.contains(marker))
            {
                score += 0.3;
            }
            if let Some(content) = &content
                && rule
                    .content_markers
                    .iter()
                    .any(|marker| content.contains(marker))
            {
                score += 0.3;
            }

            let score = score.min(1.0);
            if score > best.confidence {
                best = Classification {
                    pattern: rule.pattern,
                    confidence: score,
                };
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_drives_classification() {
        let classifier = ErrorClassifier::new();
        let result = classifier.classify(&ErrorContext {
            message: "navigation returned status 503",
            http_status: Some(503),
            page_content: None,
        });
        assert_eq!(result.pattern, ErrorPattern::ServerError);
        assert!(result.confidence >= 0.6);
    }

    #[test]
    fn content_detects_captcha_over_status() {
        let classifier = ErrorClassifier::new();
        let result = classifier.classify(&ErrorContext {
            message: "navigation returned status 403",
            http_status: Some(403),
            page_content: Some("<div class=\"g-recaptcha\"></div> please solve the CAPTCHA"),
        });
        // 403 gives Blocked 0.6; captcha markers in message+content give 0.6
        // too, so Blocked keeps the tie. With no status, captcha wins.
        let no_status = classifier.classify(&ErrorContext {
            message: "challenge page",
            http_status: None,
            page_content: Some("g-recaptcha"),
        });
        assert_eq!(no_status.pattern, ErrorPattern::Captcha);
        assert!(matches!(
            result.pattern,
            ErrorPattern::Blocked | ErrorPattern::Captcha
        ));
    }

    #[test]
    fn unknown_when_nothing_matches() {
        let classifier = ErrorClassifier::new();
        let result = classifier.classify(&ErrorContext {
            message: "something odd happened",
            http_status: None,
            page_content: None,
        });
        assert_eq!(result.pattern, ErrorPattern::Unknown);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn connection_errors_from_message() {
        let classifier = ErrorClassifier::new();
        let result = classifier.classify(&ErrorContext {
            message: "net::ERR_CONNECTION_REFUSED",
            http_status: None,
            page_content: None,
        });
        assert_eq!(result.pattern, ErrorPattern::Connection);
    }
}
