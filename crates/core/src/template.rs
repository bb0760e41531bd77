use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Literal(String),
    Token(Token),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Counter { width: usize, zero_pad: bool },
    Ext,
    Date,
    Id,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,
    #[error("unbalanced braces in template")]
    UnbalancedBraces,
    #[error("unknown placeholder: {0}")]
    UnknownToken(String),
    #[error("invalid format for {{{token}}}: {spec}")]
    BadFormat { token: String, spec: String },
}

/// Values substituted into a template for one file.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub counter: u64,
    /// Lowercased extension including the leading dot, or empty.
    pub ext: &'a str,
    /// Already normalized to `YYYY-MM-DD`.
    pub date: Option<&'a str>,
    pub id: &'a str,
}

pub fn validate_template(input: &str) -> Result<(), TemplateError> {
    parse_template(input).map(|_| ())
}

pub fn parse_template(input: &str) -> Result<Vec<TemplatePart>, TemplateError> {
    if input.is_empty() {
        return Err(TemplateError::Empty);
    }

    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                let mut token = String::new();
                let mut found_close = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        found_close = true;
                        break;
                    }
                    if next == '{' {
                        return Err(TemplateError::UnbalancedBraces);
                    }
                    token.push(next);
                }
                if !found_close || token.is_empty() {
                    return Err(TemplateError::UnbalancedBraces);
                }
                parts.push(TemplatePart::Token(parse_token(&token)?));
            }
            '}' => return Err(TemplateError::UnbalancedBraces),
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }

    Ok(parts)
}

pub fn render_template(parts: &[TemplatePart], ctx: &RenderContext<'_>) -> String {
    let mut output = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(s) => output.push_str(s),
            TemplatePart::Token(Token::Counter { width, zero_pad }) => {
                if *zero_pad {
                    output.push_str(&format!("{:0width$}", ctx.counter, width = *width));
                } else {
                    output.push_str(&format!("{:width$}", ctx.counter, width = *width));
                }
            }
            TemplatePart::Token(Token::Ext) => output.push_str(ctx.ext),
            TemplatePart::Token(Token::Date) => output.push_str(ctx.date.unwrap_or_default()),
            TemplatePart::Token(Token::Id) => output.push_str(ctx.id),
        }
    }
    output
}

/// Reduces a metadata date such as `2023:05:01 12:30:00` to `2023-05-01`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let head: String = raw
        .trim()
        .chars()
        .take(10)
        .map(|ch| if ch == ':' { '-' } else { ch })
        .collect();
    NaiveDate::parse_from_str(&head, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn parse_token(token: &str) -> Result<Token, TemplateError> {
    let (name, spec) = match token.split_once(':') {
        Some((name, spec)) => (name, Some(spec)),
        None => (token, None),
    };
    match (name, spec) {
        ("counter", None) => Ok(Token::Counter {
            width: 0,
            zero_pad: false,
        }),
        ("counter", Some(spec)) => parse_counter_spec(spec),
        ("ext", None) => Ok(Token::Ext),
        ("date", None) => Ok(Token::Date),
        ("id", None) => Ok(Token::Id),
        ("ext" | "date" | "id", Some(spec)) => Err(TemplateError::BadFormat {
            token: name.to_string(),
            spec: spec.to_string(),
        }),
        _ => Err(TemplateError::UnknownToken(token.to_string())),
    }
}

/// Accepts `03`, `03d`, `3` and `d`.
fn parse_counter_spec(spec: &str) -> Result<Token, TemplateError> {
    let bad = || TemplateError::BadFormat {
        token: "counter".to_string(),
        spec: spec.to_string(),
    };
    let digits = spec.strip_suffix('d').unwrap_or(spec);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    if digits.is_empty() {
        return Ok(Token::Counter {
            width: 0,
            zero_pad: false,
        });
    }
    let width = digits.parse::<usize>().map_err(|_| bad())?;
    Ok(Token::Counter {
        width,
        zero_pad: digits.starts_with('0'),
    })
}
