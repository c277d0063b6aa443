use std::fmt;

use anyhow::{Context, Result, bail};

/// FITS files are organised in records of this many bytes.
pub const BLOCK_LEN: usize = 2880;
/// Every header card is exactly this wide.
pub const CARD_LEN: usize = 80;

/// Round `len` up to a whole number of blocks.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_LEN) * BLOCK_LEN
}

// ---------------------------------------------------------------------------
// CardValue – the value part of a `KEYWORD = value / comment` card
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Logical(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl CardValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CardValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CardValue::Integer(i) => Some(*i as f64),
            CardValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CardValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse the value field (columns 11-80) of a card. Returns `None` for
    /// undefined values and forms we do not interpret (complex numbers).
    fn parse(field: &str) -> Option<CardValue> {
        let field = field.trim_start();
        if let Some(rest) = field.strip_prefix('\'') {
            return Some(CardValue::Text(parse_quoted(rest)));
        }
        let raw = field.split('/').next().unwrap_or("").trim();
        match raw {
            "" => None,
            "T" => Some(CardValue::Logical(true)),
            "F" => Some(CardValue::Logical(false)),
            _ => {
                if let Ok(i) = raw.parse::<i64>() {
                    return Some(CardValue::Integer(i));
                }
                raw.replace(['D', 'd'], "E")
                    .parse::<f64>()
                    .ok()
                    .map(CardValue::Float)
            }
        }
    }
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardValue::Logical(b) => write!(f, "{:>20}", if *b { "T" } else { "F" }),
            CardValue::Integer(i) => write!(f, "{i:>20}"),
            CardValue::Float(v) => write!(f, "{:>20}", format!("{v:.13E}")),
            CardValue::Text(s) => {
                let quoted = s.replace('\'', "''");
                write!(f, "'{quoted:<8}'")
            }
        }
    }
}

/// Text after the opening quote; `''` is an escaped quote, trailing blanks
/// are not significant.
fn parse_quoted(rest: &str) -> String {
    let mut out = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
            } else {
                break;
            }
        } else {
            out.push(c);
        }
    }
    out.truncate(out.trim_end().len());
    out
}

/// Render one 80-byte card.
pub fn format_card(keyword: &str, value: &CardValue) -> String {
    let mut card = format!("{keyword:<8}= {value}");
    card.truncate(CARD_LEN);
    format!("{card:<CARD_LEN$}")
}

// ---------------------------------------------------------------------------
// Header – the keyword records of one HDU
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    cards: Vec<(String, CardValue)>,
    /// Bytes occupied by the header, a multiple of [`BLOCK_LEN`].
    byte_len: usize,
}

impl Header {
    /// Parse the header starting at the beginning of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Header> {
        let mut cards = Vec::new();
        let mut block_start = 0;

        loop {
            let block = bytes
                .get(block_start..block_start + BLOCK_LEN)
                .context("header is truncated before its END card")?;

            for raw in block.chunks_exact(CARD_LEN) {
                let text = String::from_utf8_lossy(raw);
                let keyword = text.get(..8).unwrap_or(&text).trim_end();
                if keyword == "END" {
                    return Ok(Header {
                        cards,
                        byte_len: block_start + BLOCK_LEN,
                    });
                }
                // COMMENT, HISTORY, blank and CONTINUE cards carry no value
                if text.get(8..10) != Some("= ") {
                    continue;
                }
                if let Some(value) = text.get(10..).and_then(CardValue::parse) {
                    cards.push((keyword.to_string(), value));
                }
            }
            block_start += BLOCK_LEN;
        }
    }

    /// First value recorded for `keyword`.
    pub fn get(&self, keyword: &str) -> Option<&CardValue> {
        self.cards
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, v)| v)
    }

    pub fn integer(&self, keyword: &str) -> Result<i64> {
        match self.get(keyword) {
            Some(value) => value
                .as_i64()
                .with_context(|| format!("keyword {keyword} is not an integer: {value:?}")),
            None => bail!("missing required keyword {keyword}"),
        }
    }

    pub fn integer_or(&self, keyword: &str, default: i64) -> Result<i64> {
        match self.get(keyword) {
            Some(_) => self.integer(keyword),
            None => Ok(default),
        }
    }

    pub fn text(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(CardValue::as_str)
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Size of the data unit that follows, before block padding.
    pub fn data_len(&self) -> Result<usize> {
        let naxis = self.integer_or("NAXIS", 0)?;
        if naxis == 0 {
            return Ok(0);
        }
        let bitpix = self.integer("BITPIX")?;
        let gcount = self.integer_or("GCOUNT", 1)?;
        let pcount = self.integer_or("PCOUNT", 0)?;

        let mut elements: i64 = 1;
        for axis in 1..=naxis {
            let n = self.integer(&format!("NAXIS{axis}"))?;
            elements = elements
                .checked_mul(n)
                .context("data unit size overflows")?;
        }
        let bytes = (bitpix.abs() / 8)
            .checked_mul(gcount)
            .zip(pcount.checked_add(elements))
            .and_then(|(v, n)| v.checked_mul(n))
            .context("data unit size overflows")?;
        usize::try_from(bytes).context("negative data unit size")
    }
}
