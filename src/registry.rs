//! Runtime schema registry.
//!
//! Message schemas are data, not code: they are read from serialized
//! `FileDescriptorSet`s at startup and looked up by fully-qualified name.
//! After loading, the registry is only ever read, so it can be shared across
//! every stream behind an `Arc` without locking.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use bytes::Bytes;
use prost::Message;
use prost_reflect::{
    DescriptorPool, DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, Value,
};

use crate::error::{FilterError, Result};

#[derive(Debug, Clone, Default)]
pub struct MessageRegistry {
    pool: DescriptorPool,
}

/// Handle to one resolved message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    descriptor: MessageDescriptor,
}

/// Name, kind and cardinality of one declared field. `repeated` covers
/// both list and map fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub kind: FieldKind,
    pub repeated: bool,
}

impl From<FieldDescriptor> for FieldInfo {
    fn from(field: FieldDescriptor) -> Self {
        FieldInfo {
            name: field.name().to_string(),
            kind: field.kind().into(),
            repeated: field.is_list() || field.is_map(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Bytes,
    Bool,
    Integer,
    Float,
    Enum,
    Message,
}

impl From<Kind> for FieldKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::String => FieldKind::String,
            Kind::Bytes => FieldKind::Bytes,
            Kind::Bool => FieldKind::Bool,
            Kind::Float | Kind::Double => FieldKind::Float,
            Kind::Enum(_) => FieldKind::Enum,
            Kind::Message(_) => FieldKind::Message,
            _ => FieldKind::Integer,
        }
    }
}

impl MessageRegistry {
    /// Loads and merges every descriptor-set file, in order.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut registry = MessageRegistry::default();
        for path in paths {
            let path = path.as_ref();
            log::info!("Loading descriptor set {}", path.display());
            let bytes = std::fs::read(path)?;
            registry.add_descriptor_set(&bytes)?;
        }
        Ok(registry)
    }

    /// Builds a registry from one serialized `FileDescriptorSet`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut registry = MessageRegistry::default();
        registry.add_descriptor_set(bytes)?;
        Ok(registry)
    }

    fn add_descriptor_set(&mut self, bytes: &[u8]) -> Result<()> {
        let before = self.message_names();
        self.pool.decode_file_descriptor_set(bytes)?;

        for file in self.pool.files() {
            for message in file.messages() {
                if !before.iter().any(|name| name == message.full_name()) {
                    log::info!(
                        "Registered message type {} (package {})",
                        message.full_name(),
                        file.package_name()
                    );
                }
            }
        }
        Ok(())
    }

    /// Fully-qualified names of every registered message type.
    pub fn message_names(&self) -> Vec<String> {
        self.pool
            .all_messages()
            .map(|m| m.full_name().to_string())
            .collect()
    }

    pub fn resolve(&self, type_name: &str) -> Result<MessageSchema> {
        self.pool
            .get_message_by_name(type_name.trim_start_matches('.'))
            .map(|descriptor| MessageSchema { descriptor })
            .ok_or_else(|| FilterError::UnknownType(type_name.to_string()))
    }

    pub fn new_instance(&self, schema: &MessageSchema) -> NamedMessage {
        NamedMessage {
            schema: schema.clone(),
            inner: DynamicMessage::new(schema.descriptor.clone()),
        }
    }

    pub fn decode(&self, schema: &MessageSchema, bytes: Bytes) -> Result<NamedMessage> {
        DynamicMessage::decode(schema.descriptor.clone(), bytes)
            .map(|inner| NamedMessage {
                schema: schema.clone(),
                inner,
            })
            .map_err(|source| FilterError::Decode {
                message_type: schema.name().to_string(),
                source,
            })
    }

    pub fn encode(&self, message: &NamedMessage) -> Bytes {
        Bytes::from(message.inner.encode_to_vec())
    }
}

impl MessageSchema {
    pub fn name(&self) -> &str {
        self.descriptor.full_name()
    }

    pub fn fields(&self) -> Vec<FieldInfo> {
        self.descriptor.fields().map(FieldInfo::from).collect()
    }

    pub fn field(&self, name: &str) -> Result<FieldInfo> {
        self.descriptor
            .get_field_by_name(name)
            .map(FieldInfo::from)
            .ok_or_else(|| FilterError::UnknownField {
                message_type: self.name().to_string(),
                field: name.to_string(),
            })
    }
}

/// A decoded frame, accessed by field name rather than compiled bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMessage {
    schema: MessageSchema,
    inner: DynamicMessage,
}

impl NamedMessage {
    pub fn type_name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &MessageSchema {
        &self.schema
    }

    /// Current value of a string field; unset fields read as `""`.
    pub fn get_str(&self, field: &str) -> Result<Cow<'_, str>> {
        let value = self
            .inner
            .get_field_by_name(field)
            .ok_or_else(|| self.unknown_field(field))?;
        match value {
            Cow::Borrowed(Value::String(s)) => Ok(Cow::Borrowed(s.as_str())),
            Cow::Owned(Value::String(s)) => Ok(Cow::Owned(s)),
            other => Err(FilterError::Schema(format!(
                "field {}.{} is not a string: {:?}",
                self.type_name(),
                field,
                other
            ))),
        }
    }

    pub fn set_str(&mut self, field: &str, value: impl Into<String>) -> Result<()> {
        if self.schema.descriptor.get_field_by_name(field).is_none() {
            return Err(self.unknown_field(field));
        }
        self.inner
            .try_set_field_by_name(field, Value::String(value.into()))
            .map_err(|e| FilterError::Schema(format!("{}.{}: {}", self.type_name(), field, e)))
    }

    fn unknown_field(&self, field: &str) -> FilterError {
        FilterError::UnknownField {
            message_type: self.type_name().to_string(),
            field: field.to_string(),
        }
    }
}

impl fmt::Display for NamedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.type_name())?;
        for (i, (field, value)) in self.inner.fields().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}: {:?}", sep, field.name(), value)?;
        }
        write!(f, " }}")
    }
}
