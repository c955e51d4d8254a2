//! Syntax tree of the layout description language and its installation into a
//! [`ProtocolRegistry`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::Error;
use crate::field::{Field, MAX_FIXED_BYTES};
use crate::layout::Layout;
use crate::protocol::Protocol;
use crate::registry::ProtocolRegistry;
use crate::value::Value;

/// A parsed source file: layouts and discriminator maps, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct LayoutFile {
    pub layouts: Vec<LayoutDef>,
    pub maps: Vec<MapDef>,
}

#[derive(Debug, Clone)]
pub struct LayoutDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub type_spec: TypeSpec,
    pub default: Option<Literal>,
    pub discriminator: bool,
    pub wildcard: bool,
}

#[derive(Debug, Clone)]
pub enum TypeSpec {
    /// `bits(n)` and `u8`..`u64`.
    Bits(u32),
    /// `bytes(n)` with n in bytes, or `bytes` for the rest of the buffer.
    Bytes(Option<u32>),
    Lv(Box<TypeSpec>, Box<TypeSpec>),
    Tv(Box<TypeSpec>, Box<TypeSpec>),
    Tlv {
        ty: Box<TypeSpec>,
        length: Box<TypeSpec>,
        value: Box<TypeSpec>,
        exclusive: bool,
        bitwise: bool,
    },
    Options,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(u64),
    Hex(u64),
    String(String),
}

impl Literal {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Literal::Int(n) | Literal::Hex(n) => Some(*n),
            Literal::String(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Literal::Int(n) | Literal::Hex(n) => Value::Int(*n as i128),
            Literal::String(s) => Value::Bytes(s.as_bytes().to_vec()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MapDef {
    pub protocol: String,
    pub entries: Vec<(u64, String)>,
}

impl TypeSpec {
    /// Field for this type. Fixed byte strings longer than
    /// [`MAX_FIXED_BYTES`] are refused before anything is allocated.
    pub fn to_field(&self, name: &str) -> Result<Field, String> {
        let f = match self {
            TypeSpec::Bits(w) => Field::int(name, *w),
            TypeSpec::Bytes(Some(n)) => {
                if *n > MAX_FIXED_BYTES {
                    return Err(format!(
                        "{}: bytes({}) exceeds the {} byte limit",
                        name, n, MAX_FIXED_BYTES
                    ));
                }
                Field::bytes(name, n * 8)
            }
            TypeSpec::Bytes(None) => Field::rest(name),
            TypeSpec::Lv(length, value) => {
                Field::length_value(name, length.to_field("length")?, value.to_field("value")?)
            }
            TypeSpec::Tv(ty, value) => Field::type_value(name, ty.to_field("type")?, value.to_field("value")?),
            TypeSpec::Tlv {
                ty,
                length,
                value,
                exclusive,
                bitwise,
            } => {
                let mut f = Field::type_length_value(
                    name,
                    ty.to_field("type")?,
                    length.to_field("length")?,
                    value.to_field("value")?,
                );
                if *exclusive {
                    f = f.exclusive();
                }
                if *bitwise {
                    f = f.bitwise();
                }
                f
            }
            TypeSpec::Options => Field::options(name),
        };
        Ok(f)
    }
}

impl FieldDef {
    pub fn to_field(&self) -> Result<Field, String> {
        let mut f = self.type_spec.to_field(&self.name)?;
        if let Some(d) = &self.default {
            f = f.default(d.to_value());
        }
        if self.discriminator {
            f = f.discriminator();
        }
        if self.wildcard {
            f = f.wildcard();
        }
        Ok(f)
    }
}

impl LayoutDef {
    pub fn to_layout(&self) -> Result<Layout, Error> {
        let fields = self
            .fields
            .iter()
            .map(FieldDef::to_field)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| Error::InvalidLayout {
                layout: self.name.clone(),
                reason,
            })?;
        Layout::new(self.name.as_str(), fields)
    }
}

impl LayoutFile {
    /// Build every layout, check the maps, then register. Nothing is registered
    /// unless the whole file is valid. Maps naming a protocol that is already in
    /// the registry extend its table.
    pub fn install(self, registry: &mut ProtocolRegistry) -> Result<Vec<Arc<Protocol>>, Error> {
        let mut names = HashSet::new();
        for l in &self.layouts {
            if !names.insert(l.name.as_str()) {
                return Err(Error::InvalidLayout {
                    layout: l.name.clone(),
                    reason: "declared more than once".to_string(),
                });
            }
        }
        let known = |n: &str| names.contains(n) || registry.contains(n);

        let mut protocols = Vec::with_capacity(self.layouts.len());
        for l in &self.layouts {
            let mut p = Protocol::new(l.to_layout()?);
            if let Some(d) = &l.description {
                p = p.description(d.clone());
            }
            protocols.push(p);
        }

        let mut foreign: HashMap<String, Vec<(u64, String)>> = HashMap::new();
        for m in &self.maps {
            if !known(&m.protocol) {
                return Err(Error::UnknownProtocol(m.protocol.clone()));
            }
            if let Some((_, target)) = m.entries.iter().find(|(_, t)| !known(t)) {
                return Err(Error::UnknownProtocol(target.clone()));
            }
            match protocols.iter_mut().find(|p| p.name() == m.protocol) {
                Some(p) => {
                    for (v, target) in &m.entries {
                        p.push_entry(*v, target.clone());
                    }
                }
                None => foreign
                    .entry(m.protocol.clone())
                    .or_default()
                    .extend(m.entries.iter().cloned()),
            }
        }

        let installed: Vec<Arc<Protocol>> = protocols.into_iter().map(|p| registry.register(p)).collect();
        for (name, entries) in &foreign {
            registry.extend_map(name, entries)?;
        }
        debug!(layouts = installed.len(), maps = self.maps.len(), "installed layouts");
        Ok(installed)
    }
}
