use std::fmt;

use anyhow::{Context, Result, bail, ensure};

use super::header::Header;

// ---------------------------------------------------------------------------
// TFORM type codes
// ---------------------------------------------------------------------------

/// Data type letter of a `TFORMn` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    Logical,
    Bit,
    Byte,
    Short,
    Int,
    Long,
    Char,
    Float,
    Double,
    ComplexFloat,
    ComplexDouble,
    Descriptor32,
    Descriptor64,
}

impl TypeCode {
    fn from_char(c: char) -> Option<TypeCode> {
        Some(match c {
            'L' => TypeCode::Logical,
            'X' => TypeCode::Bit,
            'B' => TypeCode::Byte,
            'I' => TypeCode::Short,
            'J' => TypeCode::Int,
            'K' => TypeCode::Long,
            'A' => TypeCode::Char,
            'E' => TypeCode::Float,
            'D' => TypeCode::Double,
            'C' => TypeCode::ComplexFloat,
            'M' => TypeCode::ComplexDouble,
            'P' => TypeCode::Descriptor32,
            'Q' => TypeCode::Descriptor64,
            _ => return None,
        })
    }

    pub fn letter(self) -> char {
        match self {
            TypeCode::Logical => 'L',
            TypeCode::Bit => 'X',
            TypeCode::Byte => 'B',
            TypeCode::Short => 'I',
            TypeCode::Int => 'J',
            TypeCode::Long => 'K',
            TypeCode::Char => 'A',
            TypeCode::Float => 'E',
            TypeCode::Double => 'D',
            TypeCode::ComplexFloat => 'C',
            TypeCode::ComplexDouble => 'M',
            TypeCode::Descriptor32 => 'P',
            TypeCode::Descriptor64 => 'Q',
        }
    }

    /// The plain numeric types this crate can read and write.
    pub fn numeric(self) -> Option<NumericType> {
        match self {
            TypeCode::Byte => Some(NumericType::U8),
            TypeCode::Short => Some(NumericType::I16),
            TypeCode::Int => Some(NumericType::I32),
            TypeCode::Long => Some(NumericType::I64),
            TypeCode::Float => Some(NumericType::F32),
            TypeCode::Double => Some(NumericType::F64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ColumnFormat – parsed `rT`
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnFormat {
    pub repeat: usize,
    pub code: TypeCode,
}

impl ColumnFormat {
    pub fn new(repeat: usize, code: TypeCode) -> Self {
        ColumnFormat { repeat, code }
    }

    /// Parse a `TFORMn` value such as `8192D`, `I`, or `1PE(100)`.
    pub fn parse(tform: &str) -> Result<ColumnFormat> {
        let tform = tform.trim();
        let digits = tform.chars().take_while(char::is_ascii_digit).count();
        let repeat = if digits == 0 {
            1
        } else {
            tform[..digits]
                .parse()
                .with_context(|| format!("bad repeat count in TFORM '{tform}'"))?
        };
        let letter = tform[digits..]
            .chars()
            .next()
            .with_context(|| format!("TFORM '{tform}' has no type code"))?;
        let code = TypeCode::from_char(letter.to_ascii_uppercase())
            .with_context(|| format!("unknown type code '{letter}' in TFORM '{tform}'"))?;
        Ok(ColumnFormat { repeat, code })
    }

    /// Bytes this column occupies in each row.
    pub fn byte_width(&self) -> Result<usize> {
        let element = match self.code {
            TypeCode::Bit => return Ok(self.repeat.div_ceil(8)),
            TypeCode::Logical | TypeCode::Byte | TypeCode::Char => 1,
            TypeCode::Short => 2,
            TypeCode::Int | TypeCode::Float => 4,
            TypeCode::Long
            | TypeCode::Double
            | TypeCode::ComplexFloat
            | TypeCode::Descriptor32 => 8,
            TypeCode::ComplexDouble | TypeCode::Descriptor64 => 16,
        };
        self.repeat
            .checked_mul(element)
            .with_context(|| format!("column width of TFORM '{self}' overflows"))
    }
}

impl fmt::Display for ColumnFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.repeat, self.code.letter())
    }
}

// ---------------------------------------------------------------------------
// NumericType – element codec
// ---------------------------------------------------------------------------

/// Numeric element types, stored big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl NumericType {
    pub fn width(self) -> usize {
        match self {
            NumericType::U8 => 1,
            NumericType::I16 => 2,
            NumericType::I32 | NumericType::F32 => 4,
            NumericType::I64 | NumericType::F64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, NumericType::F32 | NumericType::F64)
    }

    pub fn code(self) -> TypeCode {
        match self {
            NumericType::U8 => TypeCode::Byte,
            NumericType::I16 => TypeCode::Short,
            NumericType::I32 => TypeCode::Int,
            NumericType::I64 => TypeCode::Long,
            NumericType::F32 => TypeCode::Float,
            NumericType::F64 => TypeCode::Double,
        }
    }

    /// Decode one element. `bytes` must be exactly [`Self::width`] long.
    pub fn read_f64(self, bytes: &[u8]) -> f64 {
        match self {
            NumericType::U8 => bytes[0] as f64,
            NumericType::I16 => i16::from_be_bytes([bytes[0], bytes[1]]) as f64,
            NumericType::I32 => i32::from_be_bytes(array(bytes)) as f64,
            NumericType::I64 => i64::from_be_bytes(array(bytes)) as f64,
            NumericType::F32 => f32::from_be_bytes(array(bytes)) as f64,
            NumericType::F64 => f64::from_be_bytes(array(bytes)),
        }
    }

    /// Decode one integer element; `None` for floating types.
    pub fn read_i64(self, bytes: &[u8]) -> Option<i64> {
        Some(match self {
            NumericType::U8 => bytes[0] as i64,
            NumericType::I16 => i16::from_be_bytes([bytes[0], bytes[1]]) as i64,
            NumericType::I32 => i32::from_be_bytes(array(bytes)) as i64,
            NumericType::I64 => i64::from_be_bytes(array(bytes)),
            NumericType::F32 | NumericType::F64 => return None,
        })
    }

    /// Encode `value` into `out`. Integer targets truncate toward zero and
    /// saturate at the type's range.
    pub fn write_f64(self, out: &mut [u8], value: f64) {
        match self {
            NumericType::U8 => out[0] = value as u8,
            NumericType::I16 => out.copy_from_slice(&(value as i16).to_be_bytes()),
            NumericType::I32 => out.copy_from_slice(&(value as i32).to_be_bytes()),
            NumericType::I64 => out.copy_from_slice(&(value as i64).to_be_bytes()),
            NumericType::F32 => out.copy_from_slice(&(value as f32).to_be_bytes()),
            NumericType::F64 => out.copy_from_slice(&value.to_be_bytes()),
        }
    }

    pub fn write_i64(self, out: &mut [u8], value: i64) {
        match self {
            NumericType::U8 => out[0] = value.clamp(0, u8::MAX as i64) as u8,
            NumericType::I16 => out.copy_from_slice(
                &(value.clamp(i16::MIN as i64, i16::MAX as i64) as i16).to_be_bytes(),
            ),
            NumericType::I32 => out.copy_from_slice(
                &(value.clamp(i32::MIN as i64, i32::MAX as i64) as i32).to_be_bytes(),
            ),
            NumericType::I64 => out.copy_from_slice(&value.to_be_bytes()),
            NumericType::F32 | NumericType::F64 => self.write_f64(out, value as f64),
        }
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

// ---------------------------------------------------------------------------
// BinTableLayout – row geometry of a BINTABLE extension
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BinTableColumn {
    pub name: String,
    pub format: ColumnFormat,
    /// Byte offset of the column inside a row.
    pub offset: usize,
    /// True when TSCALn/TZEROn are present and not the identity.
    pub scaled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinTableLayout {
    pub row_len: usize,
    pub num_rows: usize,
    pub columns: Vec<BinTableColumn>,
}

impl BinTableLayout {
    pub fn from_header(header: &Header) -> Result<BinTableLayout> {
        match header.text("XTENSION") {
            Some(x) if x.trim() == "BINTABLE" => {}
            other => bail!("expected a BINTABLE extension, found XTENSION = {other:?}"),
        }
        ensure!(header.integer("BITPIX")? == 8, "BINTABLE must have BITPIX = 8");
        ensure!(header.integer("NAXIS")? == 2, "BINTABLE must have NAXIS = 2");

        let row_len = usize::try_from(header.integer("NAXIS1")?).context("negative NAXIS1")?;
        let num_rows = usize::try_from(header.integer("NAXIS2")?).context("negative NAXIS2")?;
        let tfields = header.integer("TFIELDS")?;

        let mut columns = Vec::new();
        let mut offset: usize = 0;
        for n in 1..=tfields {
            let tform = header
                .text(&format!("TFORM{n}"))
                .with_context(|| format!("missing TFORM{n}"))?;
            let format = ColumnFormat::parse(tform)?;
            let name = header
                .text(&format!("TTYPE{n}"))
                .unwrap_or_default()
                .trim()
                .to_string();

            let tscal = header
                .get(&format!("TSCAL{n}"))
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0);
            let tzero = header
                .get(&format!("TZERO{n}"))
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);

            columns.push(BinTableColumn {
                name,
                format,
                offset,
                scaled: tscal != 1.0 || tzero != 0.0,
            });
            offset = format
                .byte_width()
                .ok()
                .and_then(|width| offset.checked_add(width))
                .with_context(|| format!("row width overflows at TFORM{n} = '{format}'"))?;
        }

        ensure!(
            offset == row_len,
            "column widths add up to {offset} bytes but NAXIS1 is {row_len}"
        );

        Ok(BinTableLayout {
            row_len,
            num_rows,
            columns,
        })
    }

    /// Look a column up by `TTYPEn`, ignoring case.
    pub fn column(&self, name: &str) -> Option<&BinTableColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Bytes of row data, `NAXIS1 * NAXIS2`.
    pub fn data_len(&self) -> Result<usize> {
        self.row_len.checked_mul(self.num_rows).with_context(|| {
            format!("{} rows of {} bytes overflow", self.num_rows, self.row_len)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::header::{CardValue, format_card, padded_len};

    #[test]
    fn parse_tform() {
        assert_eq!(
            ColumnFormat::parse("8192D").unwrap(),
            ColumnFormat::new(8192, TypeCode::Double)
        );
        assert_eq!(
            ColumnFormat::parse(" I ").unwrap(),
            ColumnFormat::new(1, TypeCode::Short)
        );
        assert_eq!(
            ColumnFormat::parse("1PE(100)").unwrap(),
            ColumnFormat::new(1, TypeCode::Descriptor32)
        );
        assert!(ColumnFormat::parse("12").is_err());
        assert!(ColumnFormat::parse("3Z").is_err());
    }

    #[test]
    fn widths() {
        let width = |repeat, code| ColumnFormat::new(repeat, code).byte_width().unwrap();
        assert_eq!(width(8192, TypeCode::Double), 65536);
        assert_eq!(width(10, TypeCode::Bit), 2);
        assert_eq!(width(1, TypeCode::Descriptor32), 8);
        assert_eq!(width(1, TypeCode::Descriptor64), 16);
        assert_eq!(width(3, TypeCode::Float), 12);
        assert!(ColumnFormat::new(usize::MAX / 4, TypeCode::Double).byte_width().is_err());
        assert_eq!(ColumnFormat::new(3, TypeCode::Short).to_string(), "3I");
    }

    #[test]
    fn element_codec_is_big_endian_and_saturating() {
        let mut buf = [0u8; 2];
        NumericType::I16.write_f64(&mut buf, 258.9);
        assert_eq!(buf, [1, 2]);
        assert_eq!(NumericType::I16.read_f64(&buf), 258.0);

        NumericType::I16.write_f64(&mut buf, 1.0e9);
        assert_eq!(NumericType::I16.read_i64(&buf), Some(i16::MAX as i64));

        let mut buf = [0u8; 4];
        NumericType::F32.write_f64(&mut buf, 0.5);
        assert_eq!(buf, 0.5f32.to_be_bytes());
        assert_eq!(NumericType::F32.read_i64(&buf), None);
    }

    fn bintable_header(naxis1: i64, naxis2: i64, tforms: &[&str]) -> Header {
        let mut cards = vec![
            format_card("XTENSION", &CardValue::Text("BINTABLE".into())),
            format_card("BITPIX", &CardValue::Integer(8)),
            format_card("NAXIS", &CardValue::Integer(2)),
            format_card("NAXIS1", &CardValue::Integer(naxis1)),
            format_card("NAXIS2", &CardValue::Integer(naxis2)),
            format_card("PCOUNT", &CardValue::Integer(0)),
            format_card("GCOUNT", &CardValue::Integer(1)),
            format_card("TFIELDS", &CardValue::Integer(tforms.len() as i64)),
        ];
        let names = ["TG_M", "COUNTS"];
        for (i, tform) in tforms.iter().enumerate() {
            let n = i + 1;
            cards.push(format_card(&format!("TTYPE{n}"), &CardValue::Text(names[i].into())));
            cards.push(format_card(&format!("TFORM{n}"), &CardValue::Text((*tform).into())));
        }
        cards.push(format_card("TZERO2", &CardValue::Integer(32768)));

        let mut bytes: Vec<u8> = cards.into_iter().flat_map(String::into_bytes).collect();
        bytes.extend(format!("{:<80}", "END").bytes());
        bytes.resize(padded_len(bytes.len()), b' ');
        Header::parse(&bytes).unwrap()
    }

    #[test]
    fn layout_from_header_checks_row_width() {
        let header = bintable_header(26, 4, &["1I", "3D"]);
        let layout = BinTableLayout::from_header(&header).unwrap();
        assert_eq!(layout.num_rows, 4);
        assert_eq!(layout.data_len().unwrap(), 104);

        let counts = layout.column("counts").unwrap();
        assert_eq!(counts.offset, 2);
        assert!(counts.scaled);
        assert!(!layout.column("TG_M").unwrap().scaled);
        assert!(layout.column("stat_err").is_none());

        assert!(BinTableLayout::from_header(&bintable_header(25, 4, &["1I", "3D"])).is_err());
    }

    #[test]
    fn absurd_sizes_are_errors_not_overflows() {
        let huge_rows = bintable_header(26, 1 << 61, &["1I", "3D"]);
        let layout = BinTableLayout::from_header(&huge_rows).unwrap();
        assert!(layout.data_len().is_err());

        let huge_repeat = format!("{}D", usize::MAX / 2);
        let err = BinTableLayout::from_header(&bintable_header(26, 4, &["1I", &huge_repeat]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("overflows"), "{err:#}");
    }
}
