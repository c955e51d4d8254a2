//! Ordered, validated schema of one protocol header.

use std::collections::HashMap;

use crate::error::Error;
use crate::field::Field;

#[derive(Debug, Clone)]
pub struct Layout {
    name: String,
    fields: Vec<Field>,
    index: HashMap<String, usize>,
    discriminator: Option<usize>,
}

impl Layout {
    /// Build a layout. Fails on bad widths or defaults, duplicate field names, or
    /// more than one discriminator.
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self, Error> {
        let name = name.into();
        let mut index = HashMap::new();
        let mut discriminator: Option<usize> = None;
        for (i, f) in fields.iter().enumerate() {
            f.validate().map_err(|reason| Error::InvalidLayout {
                layout: name.clone(),
                reason,
            })?;
            if index.insert(f.name().to_string(), i).is_some() {
                return Err(Error::InvalidLayout {
                    layout: name,
                    reason: format!("duplicate field name: {}", f.name()),
                });
            }
            if f.is_discriminator() {
                if let Some(first) = discriminator {
                    return Err(Error::LayoutDiscriminator {
                        layout: name,
                        first: fields[first].name().to_string(),
                        second: f.name().to_string(),
                    });
                }
                discriminator = Some(i);
            }
        }
        Ok(Layout {
            name,
            fields,
            index,
            discriminator,
        })
    }

    /// Layout built from fields known to be valid, as the built-in protocols are.
    pub(crate) fn trusted(name: &str, fields: Vec<Field>) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name().to_string(), i))
            .collect();
        let discriminator = fields.iter().position(Field::is_discriminator);
        Layout {
            name: name.to_string(),
            fields,
            index,
            discriminator,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.index.get(field).copied()
    }

    pub fn field(&self, field: &str) -> Option<&Field> {
        self.index_of(field).map(|i| &self.fields[i])
    }

    /// Index of the discriminator field, if the layout has one.
    pub fn discriminator(&self) -> Option<usize> {
        self.discriminator
    }

    /// Width in bits of a freshly instantiated header.
    pub fn bit_len(&self) -> u32 {
        self.fields.iter().map(Field::width).sum()
    }
}
