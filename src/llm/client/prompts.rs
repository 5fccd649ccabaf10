//! Default prompt for error log classification.

pub const DEFAULT_ANALYSIS_PROMPT: &str = r#"You are an on-call engineer triaging application errors.

Classify the error below and suggest a fix.

Timestamp: {timestamp}
Source: {source}
Message: {message}
Stack trace:
{stack_trace}

Respond with ONLY a JSON object with exactly these fields:
{"severity": "Critical|High|Medium|Low", "priority": "High|Medium|Low", "aiReasoning": "<why this severity and priority>", "potentialFix": "<concrete remediation>"}"#;
