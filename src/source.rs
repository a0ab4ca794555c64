//! Lease sources.
//!
//! A [`LeaseSource`] produces the current lease records for one run. The
//! records are finite, read once per run, and need not be ordered or
//! address-unique; the engine folds them into a [`LeaseSet`](crate::LeaseSet).
//!
//! [`IscLeasesFile`] reads the `dhcpd.leases` database written by ISC dhcpd:
//!
//! ```text
//! lease 10.0.0.9 {
//!   starts 3 2024/05/01 10:00:00;
//!   ends 3 2024/05/01 22:00:00;
//!   hardware ethernet aa:bb:cc:dd:ee:ff;
//!   client-hostname "printer";
//! }
//! ```
//!
//! Only `hardware`, `client-hostname` and `ends` are interpreted. Every other
//! statement, and every top-level block that is not a `lease`, is skipped.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::lease::LeaseRecord;

/// Produces the currently observed lease records.
#[async_trait]
pub trait LeaseSource: Send + Sync {
    /// Reads every lease record the source currently knows about.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceRead`] if the source is unreadable or
    /// malformed.
    async fn read(&self) -> Result<Vec<LeaseRecord>>;
}

#[async_trait]
impl LeaseSource for Vec<LeaseRecord> {
    async fn read(&self) -> Result<Vec<LeaseRecord>> {
        Ok(self.clone())
    }
}

/// An ISC dhcpd `dhcpd.leases` file.
#[derive(Debug, Clone)]
pub struct IscLeasesFile {
    path: PathBuf,
}

impl IscLeasesFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LeaseSource for IscLeasesFile {
    async fn read(&self) -> Result<Vec<LeaseRecord>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|error| Error::SourceRead {
                path: self.path.clone(),
                reason: error.to_string(),
            })?;

        let records = parse_isc_leases(&content).map_err(|reason| Error::SourceRead {
            path: self.path.clone(),
            reason,
        })?;

        debug!("Read {} lease(s) from {:?}", records.len(), self.path);
        Ok(records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    OpenBrace,
    CloseBrace,
    Semicolon,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
        }
    }

    fn next_token(&mut self) -> std::result::Result<Option<(Token, usize)>, String> {
        loop {
            match self.chars.peek().copied() {
                None => return Ok(None),
                Some('\n') => {
                    self.line += 1;
                    self.chars.next();
                }
                Some(ch) if ch.is_whitespace() => {
                    self.chars.next();
                }
                Some('#') => {
                    while let Some(&ch) = self.chars.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                Some(_) => break,
            }
        }

        let line = self.line;
        let token = match self.chars.next() {
            Some('{') => Token::OpenBrace,
            Some('}') => Token::CloseBrace,
            Some(';') => Token::Semicolon,
            Some('"') => Token::Quoted(self.quoted_string(line)?),
            Some(first) => {
                let mut text = String::from(first);
                while let Some(&ch) = self.chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '{' | '}' | ';' | '"' | '#') {
                        break;
                    }
                    text.push(ch);
                    self.chars.next();
                }
                Token::Word(text)
            }
            None => return Ok(None),
        };

        Ok(Some((token, line)))
    }

    /// Reads the rest of a quoted string. dhcpd writes non-printable and
    /// non-ASCII bytes as `\ooo` octal escapes, so the text is collected as
    /// bytes and decoded as UTF-8 at the end.
    fn quoted_string(&mut self, line: usize) -> std::result::Result<String, String> {
        let mut bytes = Vec::new();
        let mut buffer = [0u8; 4];

        loop {
            match self.chars.next() {
                None => return Err(format!("line {}: unterminated string", line)),
                Some('"') => break,
                Some('\\') => match self.chars.next() {
                    Some(digit @ '0'..='7') => bytes.push(self.octal_escape(digit, line)?),
                    Some(escaped) => {
                        bytes.extend_from_slice(escaped.encode_utf8(&mut buffer).as_bytes())
                    }
                    None => return Err(format!("line {}: unterminated string", line)),
                },
                Some(ch) => {
                    if ch == '\n' {
                        self.line += 1;
                    }
                    bytes.extend_from_slice(ch.encode_utf8(&mut buffer).as_bytes());
                }
            }
        }

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(error) => {
                warn!("line {}: string is not valid UTF-8, replacing invalid bytes", line);
                Ok(String::from_utf8_lossy(error.as_bytes()).into_owned())
            }
        }
    }

    /// Decodes up to three octal digits, the first already consumed.
    fn octal_escape(&mut self, first: char, line: usize) -> std::result::Result<u8, String> {
        let mut value = first.to_digit(8).unwrap_or(0);
        for _ in 0..2 {
            match self.chars.peek().and_then(|ch| ch.to_digit(8)) {
                Some(digit) => {
                    value = value * 8 + digit;
                    self.chars.next();
                }
                None => break,
            }
        }

        u8::try_from(value).map_err(|_| format!("line {}: octal escape \\{:o} out of range", line, value))
    }

    fn tokenize(mut self) -> std::result::Result<Vec<(Token, usize)>, String> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}

/// Parses the contents of a `dhcpd.leases` file.
///
/// Records are returned in file order, duplicates included. Lease blocks
/// without a hardware address are skipped with a warning.
pub fn parse_isc_leases(input: &str) -> std::result::Result<Vec<LeaseRecord>, String> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut records = Vec::new();
    let mut position = 0;

    while position < tokens.len() {
        let statement_end = find_statement_end(&tokens, position)?;
        let statement = &tokens[position..statement_end];

        if let [(Token::Word(keyword), line), (Token::Word(address), _), (Token::OpenBrace, _), ..] =
            statement
            && keyword == "lease"
        {
            let address: IpAddr = address
                .parse()
                .map_err(|_| format!("line {}: invalid lease address {:?}", line, address))?;
            let body = &statement[3..statement.len() - 1];
            if let Some(record) = parse_lease_body(address, body)? {
                records.push(record);
            }
        }

        position = statement_end;
    }

    Ok(records)
}

/// Returns the index one past the end of the statement starting at `start`:
/// either its terminating `;` or the `}` closing its block.
fn find_statement_end(
    tokens: &[(Token, usize)],
    start: usize,
) -> std::result::Result<usize, String> {
    let mut depth = 0usize;
    for (offset, (token, line)) in tokens[start..].iter().enumerate() {
        match token {
            Token::OpenBrace => depth += 1,
            Token::CloseBrace => {
                if depth == 0 {
                    return Err(format!("line {}: unexpected '}}'", line));
                }
                depth -= 1;
                if depth == 0 {
                    return Ok(start + offset + 1);
                }
            }
            Token::Semicolon if depth == 0 => return Ok(start + offset + 1),
            _ => {}
        }
    }

    let line = tokens[start].1;
    Err(format!("line {}: unterminated statement", line))
}

fn parse_lease_body(
    address: IpAddr,
    body: &[(Token, usize)],
) -> std::result::Result<Option<LeaseRecord>, String> {
    let mut hardware_id = None;
    let mut label = String::new();
    let mut expires_at = None;
    let mut position = 0;

    while position < body.len() {
        let end = find_statement_end(body, position)?;
        let statement = &body[position..end];
        position = end;

        let line = statement[0].1;
        let words: Vec<&Token> = statement.iter().map(|(token, _)| token).collect();

        match words.as_slice() {
            [Token::Word(keyword), Token::Word(_kind), Token::Word(mac), Token::Semicolon]
                if keyword == "hardware" =>
            {
                hardware_id = Some(mac.to_lowercase());
            }
            [Token::Word(keyword), Token::Quoted(name), Token::Semicolon]
                if keyword == "client-hostname" =>
            {
                label = name.trim().to_string();
            }
            [Token::Word(keyword), rest @ ..] if keyword == "ends" => {
                expires_at = parse_ends(rest).map_err(|reason| format!("line {}: {}", line, reason))?;
            }
            _ => {}
        }
    }

    let Some(hardware_id) = hardware_id else {
        warn!("Lease for {} has no hardware address, skipping", address);
        return Ok(None);
    };

    Ok(Some(LeaseRecord {
        address,
        hardware_id,
        label,
        expires_at,
    }))
}

/// Parses the arguments of an `ends` statement.
///
/// Accepts `never`, `epoch <seconds>` and `<weekday> <yyyy/mm/dd> <hh:mm:ss>`
/// (dhcpd writes these in UTC).
fn parse_ends(arguments: &[&Token]) -> std::result::Result<Option<DateTime<Utc>>, String> {
    match arguments {
        [Token::Word(never), Token::Semicolon] if never == "never" => Ok(None),
        [Token::Word(epoch), Token::Word(seconds), Token::Semicolon] if epoch == "epoch" => {
            let seconds: i64 = seconds
                .parse()
                .map_err(|_| format!("invalid epoch {:?}", seconds))?;
            DateTime::from_timestamp(seconds, 0)
                .map(Some)
                .ok_or_else(|| format!("epoch {} out of range", seconds))
        }
        [
            Token::Word(_weekday),
            Token::Word(date),
            Token::Word(time),
            Token::Semicolon,
        ] => {
            let text = format!("{} {}", date, time);
            NaiveDateTime::parse_from_str(&text, "%Y/%m/%d %H:%M:%S")
                .map(|naive| Some(naive.and_utc()))
                .map_err(|error| format!("invalid end time {:?}: {}", text, error))
        }
        _ => Err("malformed ends statement".to_string()),
    }
}
