use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// Priority bounds for simulated processes.
const MIN_PRIORITY: i32 = 0;
const MAX_PRIORITY: i32 = 10;

/// Rejection reasons surfaced to clients verbatim.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("El nombre del proceso no puede estar vacío.")]
    EmptyName,
    #[error("Prioridad inválida: {0}. Debe ser un número entre {MIN_PRIORITY} y {MAX_PRIORITY}.")]
    InvalidPriority(String),
    #[error("ID inválido: {0}.")]
    InvalidId(String),
    #[error("No existe un proceso con ID {0}.")]
    NotFound(u32),
    #[error("Campo desconocido: {0}. Campos válidos: nombre, prioridad.")]
    UnknownField(String),
}

/// One simulated process record.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessRecord {
    pub id: u32,
    pub name: String,
    pub priority: i32,
    pub state: String,
}

struct Inner {
    next_id: u32,
    records: BTreeMap<u32, ProcessRecord>,
}

/// In-memory store of simulated process records.
///
/// Ids are assigned monotonically at create time and never reused within
/// a server run. State is process-local; nothing persists across restarts.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                records: BTreeMap::new(),
            }),
        }
    }

    /// Create a record. The priority arrives as protocol text and is
    /// validated here, before any state changes.
    pub fn create(&self, name: &str, priority: &str) -> Result<String, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let priority = parse_priority(priority)?;

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.records.insert(
            id,
            ProcessRecord {
                id,
                name: name.to_string(),
                priority,
                state: "listo".to_string(),
            },
        );

        Ok(format!("Proceso '{name}' creado con ID {id}."))
    }

    /// All records in id (creation) order.
    pub fn list(&self) -> Vec<ProcessRecord> {
        self.inner.lock().records.values().cloned().collect()
    }

    pub fn delete(&self, id: &str) -> Result<String, RegistryError> {
        let id = parse_id(id)?;

        let mut inner = self.inner.lock();
        match inner.records.remove(&id) {
            Some(record) => Ok(format!("Proceso '{}' (ID {id}) eliminado.", record.name)),
            None => Err(RegistryError::NotFound(id)),
        }
    }

    /// Update one named field of a record. Field names are
    /// case-insensitive; the value is validated before the lookup mutates
    /// anything.
    pub fn modify(&self, id: &str, field: &str, value: &str) -> Result<String, RegistryError> {
        let id = parse_id(id)?;

        enum Update {
            Name(String),
            Priority(i32),
        }

        let update = match field.to_lowercase().as_str() {
            "nombre" => {
                let value = value.trim();
                if value.is_empty() {
                    return Err(RegistryError::EmptyName);
                }
                Update::Name(value.to_string())
            }
            "prioridad" => Update::Priority(parse_priority(value)?),
            other => return Err(RegistryError::UnknownField(other.to_string())),
        };

        let mut inner = self.inner.lock();
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;

        match update {
            Update::Name(name) => {
                record.name = name;
                Ok(format!("Proceso {id}: nombre actualizado a '{}'.", record.name))
            }
            Update::Priority(priority) => {
                record.priority = priority;
                Ok(format!("Proceso {id}: prioridad actualizada a {priority}."))
            }
        }
    }
}

fn parse_id(raw: &str) -> Result<u32, RegistryError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| RegistryError::InvalidId(raw.trim().to_string()))
}

fn parse_priority(raw: &str) -> Result<i32, RegistryError> {
    let parsed = raw
        .trim()
        .parse::<i32>()
        .map_err(|_| RegistryError::InvalidPriority(raw.trim().to_string()))?;

    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&parsed) {
        return Err(RegistryError::InvalidPriority(raw.trim().to_string()));
    }

    Ok(parsed)
}
