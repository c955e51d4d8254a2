//! The field family: integer fields of any width, opaque byte strings, and the
//! composite length/type prefixed forms plus ordered option lists.
//!
//! A [`Field`] is both the schema entry of a [`Layout`](crate::layout::Layout) and the
//! live value slot inside a [`Packet`](crate::packet::Packet): instantiating a packet
//! clones the schema fields, which already carry their default values.

use crate::bits::{max_value, BitReader, BitWriter};
use crate::error::Error;
use crate::value::Value;

pub type CompareFn = fn(&Value, &Value) -> bool;

/// Longest fixed-width byte string a field may declare, in bytes.
pub const MAX_FIXED_BYTES: u32 = 65535;

/// How a template field is compared against a candidate field in `matches`.
#[derive(Debug, Clone, Copy, Default)]
pub enum Compare {
    #[default]
    Equal,
    /// Ignored during matching.
    Wildcard,
    /// Called with (template value, candidate value).
    Custom(CompareFn),
}

impl Compare {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Compare::Wildcard)
    }

    pub fn is_equal(&self) -> bool {
        matches!(self, Compare::Equal)
    }
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Unsigned integer, 1..=64 bits.
    Int { width: u32 },
    /// Byte string. `None` takes the rest of the buffer (or the exact length when
    /// nested in a length-prefixed composite).
    Bytes { width: Option<u32> },
    LengthValue { length: Box<Field>, value: Box<Field> },
    TypeValue { ty: Box<Field>, value: Box<Field> },
    TypeLengthValue {
        ty: Box<Field>,
        length: Box<Field>,
        value: Box<Field>,
        /// Length counts the type and length sub-fields too.
        inclusive: bool,
        /// Length is expressed in bytes rather than bits.
        bytewise: bool,
    },
    OptionList { options: Vec<Field> },
}

#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    /// Current value of `Int` and `Bytes` fields; composites keep theirs in sub-fields.
    value: Value,
    default: Option<Value>,
    discriminator: bool,
    compare: Compare,
}

impl Field {
    fn with_kind(name: impl Into<String>, kind: FieldKind, value: Value) -> Self {
        Field {
            name: name.into(),
            kind,
            value,
            default: None,
            discriminator: false,
            compare: Compare::Equal,
        }
    }

    pub fn int(name: impl Into<String>, width: u32) -> Self {
        Self::with_kind(name, FieldKind::Int { width }, Value::Int(0))
    }

    /// Fixed-width byte string; `width` is in bits and must be a multiple of 8.
    /// Widths past [`MAX_FIXED_BYTES`] fail [`validate`](Field::validate).
    pub fn bytes(name: impl Into<String>, width: u32) -> Self {
        let zeros = vec![0; (width / 8) as usize];
        Self::with_kind(name, FieldKind::Bytes { width: Some(width) }, Value::Bytes(zeros))
    }

    /// Variable-length byte string.
    pub fn rest(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::Bytes { width: None }, Value::Bytes(Vec::new()))
    }

    pub fn length_value(name: impl Into<String>, length: Field, value: Field) -> Self {
        let kind = FieldKind::LengthValue {
            length: Box::new(length),
            value: Box::new(value),
        };
        let mut f = Self::with_kind(name, kind, Value::Int(0));
        f.sync_lengths();
        f
    }

    pub fn type_value(name: impl Into<String>, ty: Field, value: Field) -> Self {
        let kind = FieldKind::TypeValue {
            ty: Box::new(ty),
            value: Box::new(value),
        };
        Self::with_kind(name, kind, Value::Int(0))
    }

    pub fn type_length_value(name: impl Into<String>, ty: Field, length: Field, value: Field) -> Self {
        let kind = FieldKind::TypeLengthValue {
            ty: Box::new(ty),
            length: Box::new(length),
            value: Box::new(value),
            inclusive: true,
            bytewise: true,
        };
        let mut f = Self::with_kind(name, kind, Value::Int(0));
        f.sync_lengths();
        f
    }

    pub fn options(name: impl Into<String>) -> Self {
        Self::option_list(name, Vec::new())
    }

    pub fn option_list(name: impl Into<String>, options: Vec<Field>) -> Self {
        Self::with_kind(name, FieldKind::OptionList { options }, Value::Int(0))
    }

    /// Set the default (and current) value. Bounds are checked when the field is
    /// placed in a layout.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        let value = value.into();
        match &mut self.kind {
            FieldKind::Int { .. } => self.value = value.clone(),
            FieldKind::Bytes { width } => self.value = pad_bytes(value.clone(), *width),
            FieldKind::LengthValue { value: inner, .. }
            | FieldKind::TypeValue { value: inner, .. }
            | FieldKind::TypeLengthValue { value: inner, .. } => {
                inner.value = pad_bytes(value.clone(), inner.bytes_width());
            }
            FieldKind::OptionList { .. } => {}
        }
        self.default = Some(value);
        self.sync_lengths();
        self
    }

    pub fn discriminator(mut self) -> Self {
        self.discriminator = true;
        self
    }

    pub fn wildcard(mut self) -> Self {
        self.compare = Compare::Wildcard;
        self
    }

    pub fn compare(mut self, compare: Compare) -> Self {
        self.compare = compare;
        self
    }

    /// TLV length excludes the type and length sub-fields.
    pub fn exclusive(mut self) -> Self {
        if let FieldKind::TypeLengthValue { inclusive, .. } = &mut self.kind {
            *inclusive = false;
        }
        self.sync_lengths();
        self
    }

    /// TLV length is counted in bits.
    pub fn bitwise(mut self) -> Self {
        if let FieldKind::TypeLengthValue { bytewise, .. } = &mut self.kind {
            *bytewise = false;
        }
        self.sync_lengths();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_discriminator(&self) -> bool {
        self.discriminator
    }

    pub fn comparator(&self) -> Compare {
        self.compare
    }

    pub fn set_comparator(&mut self, compare: Compare) {
        self.compare = compare;
    }

    /// Declared width of an integer field.
    pub fn int_width(&self) -> Option<u32> {
        match self.kind {
            FieldKind::Int { width } => Some(width),
            _ => None,
        }
    }

    fn bytes_width(&self) -> Option<u32> {
        match self.kind {
            FieldKind::Bytes { width } => width,
            _ => None,
        }
    }

    /// True for kinds that must start on a byte boundary.
    pub fn requires_alignment(&self) -> bool {
        match &self.kind {
            FieldKind::Int { .. } | FieldKind::OptionList { .. } => false,
            FieldKind::Bytes { .. } => true,
            FieldKind::LengthValue { value, .. }
            | FieldKind::TypeValue { value, .. }
            | FieldKind::TypeLengthValue { value, .. } => value.requires_alignment(),
        }
    }

    /// Current encoded width in bits.
    pub fn width(&self) -> u32 {
        match &self.kind {
            FieldKind::Int { width } => *width,
            FieldKind::Bytes { width: Some(w) } => *w,
            FieldKind::Bytes { width: None } => match &self.value {
                Value::Bytes(b) => (b.len() * 8) as u32,
                _ => 0,
            },
            FieldKind::LengthValue { length, value } => length.width() + value.width(),
            FieldKind::TypeValue { ty, value } => ty.width() + value.width(),
            FieldKind::TypeLengthValue { ty, length, value, .. } => {
                ty.width() + length.width() + value.width()
            }
            FieldKind::OptionList { options } => options.iter().map(Field::width).sum(),
        }
    }

    /// Current value. Composites report their value sub-field; option lists
    /// report their element values in order.
    pub fn value(&self) -> Value {
        match &self.kind {
            FieldKind::Int { .. } | FieldKind::Bytes { .. } => self.value.clone(),
            FieldKind::LengthValue { value, .. }
            | FieldKind::TypeValue { value, .. }
            | FieldKind::TypeLengthValue { value, .. } => value.value(),
            FieldKind::OptionList { options } => {
                Value::List(options.iter().map(Field::value).collect())
            }
        }
    }

    /// The integer value, for `Int` fields.
    pub fn as_u64(&self) -> Option<u64> {
        match self.kind {
            FieldKind::Int { .. } => self.value.as_u64(),
            _ => None,
        }
    }

    /// Validate `value` against this field's capacity without storing it.
    pub fn check(&self, value: &Value) -> Result<(), Error> {
        match (&self.kind, value) {
            (FieldKind::Int { width }, Value::Int(x)) => {
                let max = max_value(*width) as i128;
                if *x < 0 || *x > max {
                    return Err(Error::bounds(
                        &self.name,
                        format!("value must be between 0 and {} but is {}", max, x),
                    ));
                }
                Ok(())
            }
            (FieldKind::Int { .. }, _) => Err(self.type_error("integer")),
            (FieldKind::Bytes { width }, Value::Bytes(b)) => match width {
                Some(w) if b.len() > (*w / 8) as usize => Err(Error::bounds(
                    &self.name,
                    format!("value must be at most {} bytes long but is {}", w / 8, b.len()),
                )),
                _ => Ok(()),
            },
            (FieldKind::Bytes { .. }, _) => Err(self.type_error("bytes")),
            (FieldKind::LengthValue { length, value: inner }, v) => {
                inner.check(v)?;
                if let Value::Bytes(b) = v {
                    length.check_length(&self.name, b.len() as u64)?;
                }
                Ok(())
            }
            (FieldKind::TypeValue { value: inner, .. }, v) => inner.check(v),
            (FieldKind::TypeLengthValue { length, value: inner, .. }, v) => {
                inner.check(v)?;
                let bits = match v {
                    Value::Bytes(b) => (b.len() * 8) as u64,
                    _ => inner.width() as u64,
                };
                length.check_length(&self.name, self.tlv_length_for(bits))
            }
            (FieldKind::OptionList { options }, Value::List(items)) => {
                if items.len() != options.len() {
                    return Err(Error::bounds(
                        &self.name,
                        format!("option list has {} elements, got {}", options.len(), items.len()),
                    ));
                }
                options.iter().zip(items).try_for_each(|(o, v)| o.check(v))
            }
            (FieldKind::OptionList { .. }, _) => Err(self.type_error("list")),
        }
    }

    fn check_length(&self, owner: &str, n: u64) -> Result<(), Error> {
        let w = self.int_width().unwrap_or(0);
        if n > max_value(w) {
            return Err(Error::bounds(
                owner,
                format!("length {} does not fit the {}-bit length field", n, w),
            ));
        }
        Ok(())
    }

    fn type_error(&self, expected: &'static str) -> Error {
        Error::FieldType {
            field: self.name.clone(),
            expected,
        }
    }

    /// Bounds-check and store a value. Dependent length sub-fields are recomputed.
    pub fn set(&mut self, value: Value) -> Result<(), Error> {
        self.check(&value)?;
        match &mut self.kind {
            FieldKind::Int { .. } => self.value = value,
            FieldKind::Bytes { width } => self.value = pad_bytes(value, *width),
            FieldKind::LengthValue { value: inner, .. }
            | FieldKind::TypeValue { value: inner, .. }
            | FieldKind::TypeLengthValue { value: inner, .. } => inner.set(value)?,
            FieldKind::OptionList { options } => {
                if let Value::List(items) = value {
                    for (o, v) in options.iter_mut().zip(items) {
                        o.set(v)?;
                    }
                }
            }
        }
        self.sync_lengths();
        Ok(())
    }

    /// Set the type sub-field of a TV or TLV composite.
    pub fn set_type(&mut self, value: Value) -> Result<(), Error> {
        match &mut self.kind {
            FieldKind::TypeValue { ty, .. } | FieldKind::TypeLengthValue { ty, .. } => ty.set(value),
            _ => Err(self.type_error("type-value composite")),
        }
    }

    pub fn type_field(&self) -> Option<&Field> {
        match &self.kind {
            FieldKind::TypeValue { ty, .. } | FieldKind::TypeLengthValue { ty, .. } => Some(ty),
            _ => None,
        }
    }

    pub fn length_field(&self) -> Option<&Field> {
        match &self.kind {
            FieldKind::LengthValue { length, .. } | FieldKind::TypeLengthValue { length, .. } => {
                Some(length)
            }
            _ => None,
        }
    }

    pub fn value_field(&self) -> Option<&Field> {
        match &self.kind {
            FieldKind::LengthValue { value, .. }
            | FieldKind::TypeValue { value, .. }
            | FieldKind::TypeLengthValue { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn option_fields(&self) -> &[Field] {
        match &self.kind {
            FieldKind::OptionList { options } => options,
            _ => &[],
        }
    }

    /// Append an element to an option list.
    pub fn push_option(&mut self, option: Field) -> Result<(), Error> {
        match &mut self.kind {
            FieldKind::OptionList { options } => {
                option.validate().map_err(|reason| Error::InvalidLayout {
                    layout: self.name.clone(),
                    reason,
                })?;
                options.push(option);
                Ok(())
            }
            _ => Err(self.type_error("option list")),
        }
    }

    pub fn clear_options(&mut self) {
        if let FieldKind::OptionList { options } = &mut self.kind {
            options.clear();
        }
    }

    /// Restore the default, or the zero value when there is none.
    pub fn reset(&mut self) {
        match &mut self.kind {
            FieldKind::Int { .. } => {
                self.value = self.default.clone().unwrap_or(Value::Int(0));
            }
            FieldKind::Bytes { width } => {
                let v = self.default.clone().unwrap_or(Value::Bytes(Vec::new()));
                self.value = pad_bytes(v, *width);
            }
            FieldKind::LengthValue { length, value } => {
                length.reset();
                value.reset();
            }
            FieldKind::TypeValue { ty, value } => {
                ty.reset();
                value.reset();
            }
            FieldKind::TypeLengthValue { ty, length, value, .. } => {
                ty.reset();
                length.reset();
                value.reset();
            }
            FieldKind::OptionList { options } => options.iter_mut().for_each(Field::reset),
        }
        if let (Some(d), Some(inner)) = (self.default.clone(), self.value_field_mut()) {
            inner.value = pad_bytes(d, inner.bytes_width());
        }
        self.sync_lengths();
    }

    fn value_field_mut(&mut self) -> Option<&mut Field> {
        match &mut self.kind {
            FieldKind::LengthValue { value, .. }
            | FieldKind::TypeValue { value, .. }
            | FieldKind::TypeLengthValue { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Length an LV composite carries for its current value: the byte count of a
    /// byte string, or the bit width of an integer.
    fn lv_length(value: &Field) -> u64 {
        match value.kind {
            FieldKind::Bytes { .. } => (value.width() / 8) as u64,
            _ => value.width() as u64,
        }
    }

    fn tlv_length_for(&self, value_bits: u64) -> u64 {
        match &self.kind {
            FieldKind::TypeLengthValue {
                ty,
                length,
                inclusive,
                bytewise,
                ..
            } => {
                let mut n = value_bits;
                if *inclusive {
                    n += (ty.width() + length.width()) as u64;
                }
                if *bytewise {
                    n /= 8;
                }
                n
            }
            _ => value_bits,
        }
    }

    /// Length an LV/TLV composite would encode for its current value.
    pub fn computed_length(&self) -> Option<u64> {
        match &self.kind {
            FieldKind::LengthValue { value, .. } => Some(Self::lv_length(value)),
            FieldKind::TypeLengthValue { value, .. } => {
                Some(self.tlv_length_for(value.width() as u64))
            }
            _ => None,
        }
    }

    /// Recompute the stored length sub-fields from the current values.
    pub fn sync_lengths(&mut self) {
        let computed = self.computed_length();
        match &mut self.kind {
            FieldKind::LengthValue { length, .. } | FieldKind::TypeLengthValue { length, .. } => {
                if let Some(n) = computed {
                    length.value = Value::Int(n as i128);
                }
            }
            FieldKind::OptionList { options } => options.iter_mut().for_each(Field::sync_lengths),
            _ => {}
        }
    }

    pub fn encode(&self, w: &mut BitWriter) -> Result<(), Error> {
        match &self.kind {
            FieldKind::Int { width } => {
                let v = self.value.as_u64().ok_or_else(|| self.type_error("integer"))?;
                w.write(v, *width);
                Ok(())
            }
            FieldKind::Bytes { width } => {
                let b = self.value.as_bytes().ok_or_else(|| self.type_error("bytes"))?;
                match width {
                    Some(bits) if b.len() < (*bits / 8) as usize => {
                        let mut padded = b.to_vec();
                        padded.resize((*bits / 8) as usize, 0);
                        w.write_bytes(&self.name, &padded)
                    }
                    _ => w.write_bytes(&self.name, b),
                }
            }
            FieldKind::LengthValue { length, value } => {
                let n = Self::lv_length(value);
                length.check_length(&self.name, n)?;
                w.write(n, length.width());
                value.encode(w)
            }
            FieldKind::TypeValue { ty, value } => {
                ty.encode(w)?;
                value.encode(w)
            }
            FieldKind::TypeLengthValue { ty, length, value, .. } => {
                let n = self.tlv_length_for(value.width() as u64);
                length.check_length(&self.name, n)?;
                ty.encode(w)?;
                w.write(n, length.width());
                value.encode(w)
            }
            FieldKind::OptionList { options } => options.iter().try_for_each(|o| o.encode(w)),
        }
    }

    pub fn decode(&mut self, r: &mut BitReader<'_>) -> Result<(), Error> {
        match &mut self.kind {
            FieldKind::Int { width } => {
                self.value = Value::Int(r.read(*width) as i128);
                Ok(())
            }
            FieldKind::Bytes { width: Some(bits) } => {
                let b = r.read_bytes(&self.name, (*bits / 8) as usize)?;
                self.value = pad_bytes(Value::Bytes(b.to_vec()), Some(*bits));
                Ok(())
            }
            FieldKind::Bytes { width: None } => {
                self.value = Value::Bytes(r.read_rest(&self.name)?.to_vec());
                Ok(())
            }
            FieldKind::LengthValue { length, value } => {
                length.decode(r)?;
                let n = length.value.as_u64().unwrap_or(0);
                match value.kind {
                    FieldKind::Bytes { width: None } => {
                        value.value = Value::Bytes(read_exact(r, &self.name, n as usize)?);
                        Ok(())
                    }
                    _ => value.decode(r),
                }
            }
            FieldKind::TypeValue { ty, value } => {
                ty.decode(r)?;
                value.decode(r)
            }
            FieldKind::TypeLengthValue {
                ty,
                length,
                value,
                inclusive,
                bytewise,
            } => {
                ty.decode(r)?;
                length.decode(r)?;
                match value.kind {
                    FieldKind::Bytes { width: None } => {
                        let declared = length.value.as_u64().unwrap_or(0);
                        let mut bits = if *bytewise {
                            declared.checked_mul(8).ok_or_else(|| {
                                Error::Unpack(format!("{}: length {} is too large", self.name, declared))
                            })?
                        } else {
                            declared
                        };
                        if *inclusive {
                            let header = u64::from(ty.width()) + u64::from(length.width());
                            bits = bits.checked_sub(header).ok_or_else(|| {
                                Error::Unpack(format!(
                                    "{}: length {} is shorter than its own header",
                                    self.name, declared
                                ))
                            })?;
                        }
                        let n = usize::try_from(bits / 8).unwrap_or(usize::MAX);
                        value.value = Value::Bytes(read_exact(r, &self.name, n)?);
                        Ok(())
                    }
                    _ => value.decode(r),
                }
            }
            FieldKind::OptionList { options } => options.iter_mut().try_for_each(|o| o.decode(r)),
        }
    }

    /// Template-side comparison: `self` is the template field.
    pub fn matches(&self, other: &Field) -> bool {
        match self.compare {
            Compare::Wildcard => true,
            Compare::Custom(f) => f(&self.value(), &other.value()),
            Compare::Equal => match (&self.kind, &other.kind) {
                (FieldKind::OptionList { options: a }, FieldKind::OptionList { options: b }) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches(y))
                }
                _ => self.value() == other.value(),
            },
        }
    }

    /// Structural validity of the declaration (widths, sub-field kinds, default bounds).
    pub fn validate(&self) -> Result<(), String> {
        match &self.kind {
            FieldKind::Int { width } => {
                if *width == 0 || *width > 64 {
                    return Err(format!("{}: integer width {} outside 1..=64", self.name, width));
                }
            }
            FieldKind::Bytes { width: Some(w) } => {
                if *w % 8 != 0 {
                    return Err(format!("{}: byte string width {} is not a multiple of 8", self.name, w));
                }
                if *w / 8 > MAX_FIXED_BYTES {
                    return Err(format!(
                        "{}: byte string of {} bytes exceeds the {} byte limit",
                        self.name,
                        w / 8,
                        MAX_FIXED_BYTES
                    ));
                }
            }
            FieldKind::Bytes { width: None } => {}
            FieldKind::LengthValue { length, value } => {
                require_int(&self.name, "length", length)?;
                require_scalar(&self.name, value)?;
            }
            FieldKind::TypeValue { ty, value } => {
                require_int(&self.name, "type", ty)?;
                require_scalar(&self.name, value)?;
            }
            FieldKind::TypeLengthValue { ty, length, value, .. } => {
                require_int(&self.name, "type", ty)?;
                require_int(&self.name, "length", length)?;
                require_scalar(&self.name, value)?;
            }
            FieldKind::OptionList { options } => {
                for o in options {
                    o.validate()?;
                }
            }
        }
        if let Some(d) = &self.default {
            self.check(d).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value() == other.value()
    }
}

fn require_int(owner: &str, role: &str, f: &Field) -> Result<(), String> {
    f.validate()?;
    match f.kind {
        FieldKind::Int { .. } => Ok(()),
        _ => Err(format!("{}: {} sub-field must be an integer", owner, role)),
    }
}

fn require_scalar(owner: &str, f: &Field) -> Result<(), String> {
    f.validate()?;
    match f.kind {
        FieldKind::Int { .. } | FieldKind::Bytes { .. } => Ok(()),
        _ => Err(format!("{}: value sub-field must be an integer or byte string", owner)),
    }
}

fn pad_bytes(value: Value, width: Option<u32>) -> Value {
    match (value, width) {
        (Value::Bytes(mut b), Some(bits)) if b.len() < (bits / 8) as usize => {
            b.resize((bits / 8) as usize, 0);
            Value::Bytes(b)
        }
        (v, _) => v,
    }
}

fn read_exact(r: &mut BitReader<'_>, name: &str, n: usize) -> Result<Vec<u8>, Error> {
    let b = r.read_bytes(name, n)?;
    if b.len() < n {
        return Err(Error::Unpack(format!(
            "{}: declared length {} exceeds the {} bytes available",
            name,
            n,
            b.len()
        )));
    }
    Ok(b.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(f: &Field) -> Field {
        let mut w = BitWriter::new();
        f.encode(&mut w).unwrap();
        let bytes = w.finish();
        let mut out = f.clone();
        out.reset();
        out.decode(&mut BitReader::new(&bytes)).unwrap();
        out
    }

    #[test]
    fn int_bounds_are_checked_on_set() {
        let mut f = Field::int("ttl", 8);
        assert!(f.set(Value::Int(255)).is_ok());
        assert!(matches!(f.set(Value::Int(256)), Err(Error::FieldBounds { .. })));
        assert!(matches!(f.set(Value::Int(-1)), Err(Error::FieldBounds { .. })));
        assert_eq!(f.value(), Value::Int(255));

        let mut wide = Field::int("seq", 64);
        assert!(wide.set(Value::Int(u64::MAX as i128)).is_ok());
        assert!(wide.set(Value::Int(1i128 << 64)).is_err());
    }

    #[test]
    fn wrong_value_kind_is_rejected() {
        let mut f = Field::int("ttl", 8);
        assert!(matches!(f.set(Value::Bytes(vec![1])), Err(Error::FieldType { .. })));
        let mut s = Field::bytes("mac", 48);
        assert!(matches!(s.set(Value::Int(1)), Err(Error::FieldType { .. })));
    }

    #[test]
    fn fixed_bytes_are_padded_to_width() {
        let mut f = Field::bytes("name", 32);
        f.set(Value::from(&b"ab"[..])).unwrap();
        assert_eq!(f.value(), Value::Bytes(vec![b'a', b'b', 0, 0]));
        assert!(matches!(
            f.set(Value::from(&b"abcde"[..])),
            Err(Error::FieldBounds { .. })
        ));
    }

    #[test]
    fn length_value_recomputes_length() {
        let mut f = Field::length_value("name", Field::int("len", 8), Field::rest("value"));
        f.set(Value::from("hello")).unwrap();
        assert_eq!(f.length_field().unwrap().value(), Value::Int(5));

        let mut w = BitWriter::new();
        f.encode(&mut w).unwrap();
        assert_eq!(w.finish(), b"\x05hello".to_vec());

        let back = roundtrip(&f);
        assert_eq!(back.value(), Value::from("hello"));
    }

    #[test]
    fn length_value_rejects_values_its_length_cannot_describe() {
        let mut f = Field::length_value("name", Field::int("len", 4), Field::rest("value"));
        assert!(f.set(Value::Bytes(vec![0; 15])).is_ok());
        assert!(matches!(f.set(Value::Bytes(vec![0; 16])), Err(Error::FieldBounds { .. })));
    }

    #[test]
    fn length_value_declared_beyond_buffer_is_an_unpack_error() {
        let mut f = Field::length_value("name", Field::int("len", 8), Field::rest("value"));
        let err = f.decode(&mut BitReader::new(b"\x09abc")).unwrap_err();
        assert!(matches!(err, Error::Unpack(_)));
    }

    #[test]
    fn tlv_length_is_inclusive_and_bytewise_by_default() {
        let mut f = Field::type_length_value(
            "opt",
            Field::int("type", 8),
            Field::int("length", 8),
            Field::rest("value"),
        );
        f.set_type(Value::Int(148)).unwrap();
        f.set(Value::Bytes(vec![0, 0])).unwrap();
        let mut w = BitWriter::new();
        f.encode(&mut w).unwrap();
        assert_eq!(w.finish(), vec![148, 4, 0, 0]);

        let back = roundtrip(&f);
        assert_eq!(back.value(), Value::Bytes(vec![0, 0]));
        assert_eq!(back.type_field().unwrap().value(), Value::Int(148));
    }

    #[test]
    fn tlv_exclusive_bitwise_length() {
        let f = Field::type_length_value(
            "opt",
            Field::int("type", 8),
            Field::int("length", 16),
            Field::int("value", 12),
        )
        .exclusive()
        .bitwise();
        assert_eq!(f.computed_length(), Some(12));
    }

    #[test]
    fn tlv_shorter_than_its_header_fails() {
        let mut f = Field::type_length_value(
            "opt",
            Field::int("type", 8),
            Field::int("length", 8),
            Field::rest("value"),
        );
        let err = f.decode(&mut BitReader::new(&[7, 1, 0xff])).unwrap_err();
        assert!(matches!(err, Error::Unpack(_)));
    }

    #[test]
    fn tlv_huge_bytewise_length_fails() {
        let mut f = Field::type_length_value(
            "opt",
            Field::int("type", 8),
            Field::int("length", 64),
            Field::rest("value"),
        );
        let data = [1, 0x20, 0, 0, 0, 0, 0, 0, 0, 0xaa, 0xbb];
        let err = f.decode(&mut BitReader::new(&data)).unwrap_err();
        assert!(matches!(err, Error::Unpack(ref m) if m.contains("too large")));

        let data = [1, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xf0, 0xaa];
        let err = f.exclusive().decode(&mut BitReader::new(&data)).unwrap_err();
        assert!(matches!(err, Error::Unpack(_)));
    }

    #[test]
    fn type_value_roundtrip() {
        let mut f = Field::type_value("tv", Field::int("type", 4), Field::int("value", 12));
        f.set_type(Value::Int(0xa)).unwrap();
        f.set(Value::Int(0xbcd)).unwrap();
        let mut w = BitWriter::new();
        f.encode(&mut w).unwrap();
        assert_eq!(w.finish(), vec![0xab, 0xcd]);
        assert_eq!(roundtrip(&f).value(), Value::Int(0xbcd));
    }

    #[test]
    fn option_list_threads_the_cursor() {
        let mut f = Field::options("options");
        f.push_option(Field::int("nop", 8).default(1u8)).unwrap();
        f.push_option(Field::int("nibble", 4).default(0xfu8)).unwrap();
        f.push_option(Field::int("nibble2", 4).default(0x3u8)).unwrap();
        assert_eq!(f.width(), 16);

        let mut w = BitWriter::new();
        f.encode(&mut w).unwrap();
        assert_eq!(w.finish(), vec![0x01, 0xf3]);

        let mut other = f.clone();
        other.set(Value::List(vec![Value::Int(0); 3])).unwrap();
        other.decode(&mut BitReader::new(&[0x01, 0xf3])).unwrap();
        assert_eq!(other.value(), f.value());
    }

    #[test]
    fn string_inside_misaligned_cursor_fails() {
        let f = Field::bytes("s", 8);
        let mut w = BitWriter::new();
        w.write(1, 1);
        assert!(matches!(f.encode(&mut w), Err(Error::FieldAlignment(_))));
    }

    #[test]
    fn wildcard_and_custom_compare() {
        let a = Field::int("x", 8).default(1u8);
        let b = Field::int("x", 8).default(2u8);
        assert!(!a.matches(&b));
        assert!(a.clone().wildcard().matches(&b));
        let ge = a.clone().compare(Compare::Custom(|t, c| c.as_int() >= t.as_int()));
        assert!(ge.matches(&b));
        assert!(!ge.matches(&Field::int("x", 8)));
    }

    #[test]
    fn validation_rejects_bad_widths_and_defaults() {
        assert!(Field::int("x", 0).validate().is_err());
        assert!(Field::int("x", 65).validate().is_err());
        assert!(Field::bytes("s", 12).validate().is_err());
        assert!(Field::int("x", 4).default(16u8).validate().is_err());
        assert!(Field::length_value("lv", Field::rest("l"), Field::rest("v")).validate().is_err());
    }
}
