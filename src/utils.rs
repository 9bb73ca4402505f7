use std::io::{self, Write};

use scraper::Selector;
use url::Url;

use crate::error::{Error, Result};

/// Accepts only absolute http(s) URLs with a dotted host name.
pub fn validate_url(input: &str) -> Result<Url> {
    let trimmed = input.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| Error::invalid_input(format!("'{}' is not a valid URL: {}", trimmed, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::invalid_input(format!("'{}' is not an http(s) URL", trimmed)));
    }
    match url.host_str() {
        Some(host) if host.contains('.') && !host.starts_with('.') && !host.ends_with('.') => Ok(url),
        _ => Err(Error::invalid_input(format!("'{}' has no usable host", trimmed))),
    }
}

/// Splits a comma separated list of URLs, validating each one. Order is kept.
pub fn parse_url_list(input: &str) -> Result<Vec<Url>> {
    let urls = input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(validate_url)
        .collect::<Result<Vec<_>>>()?;

    if urls.is_empty() {
        return Err(Error::invalid_input("at least one URL is required"));
    }
    Ok(urls)
}

/// Turns a title into something safe to use as a file name.
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || "-_~,;[]().".contains(*c))
        .collect();

    // collapse any run of two or more dots to nothing
    let mut cleaned = String::with_capacity(kept.len());
    let mut dots = 0;
    for c in kept.chars().chain(std::iter::once('\0')) {
        if c == '.' {
            dots += 1;
            continue;
        }
        if dots == 1 {
            cleaned.push('.');
        }
        dots = 0;
        if c != '\0' {
            cleaned.push(c);
        }
    }

    cleaned.replace(' ', "-")
}

pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::invalid_input(format!("bad selector '{}': {}", css, e)))
}

pub fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

pub fn get_user_urls() -> Result<Vec<Url>> {
    let answer = prompt("Enter webnovel URL(s), comma separated (order matters): ")?;
    parse_url_list(&answer)
}
