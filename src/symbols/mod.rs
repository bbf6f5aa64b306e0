//! Symbol resolution from compiled firmware images.
//!
//! A [`SymbolTable`] is built once per loaded firmware ELF and is immutable
//! afterwards; the [`SymbolStore`] keeps one table per controller and
//! replaces a table wholesale when new firmware is loaded, so concurrent
//! lookups never observe a partial update.

mod dwarf;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::{GatewayError, Result};

/// Byte order of the firmware image a symbol came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Unsigned,
    Signed,
    Float,
    Bool,
}

/// Type descriptor for a firmware variable.
#[derive(Debug, Clone)]
pub enum TypeDesc {
    Scalar { kind: ScalarKind, size: u32 },
    Array { elem: Box<TypeDesc>, count: u32 },
    Struct { size: u32, fields: Vec<StructField> },
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub offset: u32,
    pub ty: TypeDesc,
}

impl TypeDesc {
    pub fn byte_size(&self) -> u32 {
        match self {
            TypeDesc::Scalar { size, .. } => *size,
            TypeDesc::Array { elem, count } => elem.byte_size() * count,
            TypeDesc::Struct { size, .. } => *size,
        }
    }
}

/// A named firmware variable with a resolved memory address and type.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    pub ty: TypeDesc,
    pub byte_order: ByteOrder,
}

/// Result of resolving a symbol path down to a concrete memory window.
#[derive(Debug, Clone)]
pub struct ResolvedLocation {
    pub address: u32,
    pub size: u32,
    pub ty: TypeDesc,
    pub byte_order: ByteOrder,
}

impl ResolvedLocation {
    /// Decode raw memory bytes into a numeric value, when the resolved
    /// type is a scalar of a decodable width. Composite locations and
    /// short reads yield `None`.
    pub fn decode(&self, bytes: &[u8]) -> Option<f64> {
        let TypeDesc::Scalar { kind, size } = &self.ty else {
            return None;
        };
        let size = *size as usize;
        if bytes.len() < size || !matches!(size, 1 | 2 | 4 | 8) {
            return None;
        }
        let mut raw: u64 = 0;
        match self.byte_order {
            ByteOrder::Little => {
                for (i, b) in bytes[..size].iter().enumerate() {
                    raw |= (*b as u64) << (i * 8);
                }
            }
            ByteOrder::Big => {
                for b in &bytes[..size] {
                    raw = (raw << 8) | *b as u64;
                }
            }
        }
        match kind {
            ScalarKind::Unsigned => Some(raw as f64),
            ScalarKind::Bool => Some(if raw != 0 { 1.0 } else { 0.0 }),
            ScalarKind::Signed => {
                let shift = 64 - (size as u32 * 8);
                Some(((raw << shift) as i64 >> shift) as f64)
            }
            ScalarKind::Float => match size {
                4 => Some(f32::from_bits(raw as u32) as f64),
                8 => Some(f64::from_bits(raw)),
                _ => None,
            },
        }
    }
}

/// Name-indexed table of firmware variables, immutable after construction.
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
    load_ranges: Vec<(u64, u64)>,
}

impl SymbolTable {
    /// Parse a firmware ELF file into a symbol table.
    pub fn from_elf(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_elf_bytes(&data)
    }

    /// Parse firmware ELF bytes into a symbol table. Symbols whose storage
    /// falls outside the image's PT_LOAD ranges are dropped.
    pub fn from_elf_bytes(data: &[u8]) -> Result<Self> {
        let parsed = dwarf::parse_image(data)?;
        let mut symbols = HashMap::new();
        for sym in parsed.symbols {
            let start = sym.address as u64;
            let end = start + sym.ty.byte_size() as u64;
            let in_range = parsed
                .load_ranges
                .iter()
                .any(|(lo, hi)| start >= *lo && end <= *hi);
            if !in_range {
                debug!(
                    name = %sym.name,
                    address = format_args!("0x{:08x}", sym.address),
                    "symbol outside loadable ranges, dropping"
                );
                continue;
            }
            symbols.entry(sym.name.clone()).or_insert(sym);
        }
        Ok(Self {
            symbols,
            load_ranges: parsed.load_ranges,
        })
    }

    /// Build a table directly from symbols. Useful for testing.
    pub fn from_symbols(symbols: Vec<Symbol>) -> Self {
        let load_ranges = symbols
            .iter()
            .map(|s| (s.address as u64, s.address as u64 + s.ty.byte_size() as u64))
            .collect();
        Self {
            symbols: symbols.into_iter().map(|s| (s.name.clone(), s)).collect(),
            load_ranges,
        }
    }

    /// Look up a symbol by exact name.
    pub fn lookup(&self, name: &str) -> Result<&Symbol> {
        self.symbols
            .get(name)
            .ok_or_else(|| GatewayError::SymbolNotFound(name.to_string()))
    }

    /// Resolve a dotted/bracketed access path (`sensors.temps[2]`) to a
    /// concrete address and size by narrowing the type at each step.
    pub fn resolve_path(&self, path: &str) -> Result<ResolvedLocation> {
        let (base, accessors) = parse_path(path)?;
        let symbol = self.lookup(&base)?;
        let mut address = symbol.address;
        let mut ty = &symbol.ty;

        for accessor in &accessors {
            match accessor {
                Accessor::Field(field_name) => match ty {
                    TypeDesc::Struct { fields, .. } => {
                        let field = fields
                            .iter()
                            .find(|f| f.name == *field_name)
                            .ok_or_else(|| GatewayError::InvalidPath {
                                path: path.to_string(),
                                reason: format!("no field named '{}'", field_name),
                            })?;
                        address += field.offset;
                        ty = &field.ty;
                    }
                    _ => {
                        return Err(GatewayError::InvalidPath {
                            path: path.to_string(),
                            reason: format!("'{}' is not a structure", field_name),
                        })
                    }
                },
                Accessor::Index(index) => match ty {
                    TypeDesc::Array { elem, count } => {
                        if index >= count {
                            return Err(GatewayError::InvalidPath {
                                path: path.to_string(),
                                reason: format!("index {} out of range 0..{}", index, count),
                            });
                        }
                        address += index * elem.byte_size();
                        ty = elem;
                    }
                    _ => {
                        return Err(GatewayError::InvalidPath {
                            path: path.to_string(),
                            reason: "indexed access on a non-array".to_string(),
                        })
                    }
                },
            }
        }

        Ok(ResolvedLocation {
            address,
            size: ty.byte_size(),
            ty: ty.clone(),
            byte_order: symbol.byte_order,
        })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(|s| s.as_str())
    }

    pub fn load_ranges(&self) -> &[(u64, u64)] {
        &self.load_ranges
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Accessor {
    Field(String),
    Index(u32),
}

/// Split `base.field[3].sub` into the base identifier and its accessors.
fn parse_path(path: &str) -> Result<(String, Vec<Accessor>)> {
    let invalid = |reason: &str| GatewayError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = path.chars().peekable();
    let mut base = String::new();
    while let Some(&c) = chars.peek() {
        if c == '.' || c == '[' {
            break;
        }
        base.push(c);
        chars.next();
    }
    if base.is_empty() {
        return Err(invalid("empty symbol name"));
    }

    let mut accessors = Vec::new();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut field = String::new();
                while let Some(&n) = chars.peek() {
                    if n == '.' || n == '[' {
                        break;
                    }
                    field.push(n);
                    chars.next();
                }
                if field.is_empty() {
                    return Err(invalid("empty field name"));
                }
                accessors.push(Accessor::Field(field));
            }
            '[' => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(_) => return Err(invalid("non-numeric array index")),
                        None => return Err(invalid("unterminated array index")),
                    }
                }
                let index: u32 = digits
                    .parse()
                    .map_err(|_| invalid("invalid array index"))?;
                accessors.push(Accessor::Index(index));
            }
            _ => return Err(invalid("expected '.' or '[' after segment")),
        }
    }

    Ok((base, accessors))
}

/// Per-controller symbol tables. Replacing a table is an atomic swap;
/// in-flight lookups keep their `Arc` to the old table.
#[derive(Clone, Default)]
pub struct SymbolStore {
    tables: Arc<RwLock<HashMap<String, Arc<SymbolTable>>>>,
}

impl SymbolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a firmware image for a controller, replacing any previous table.
    pub fn load(&self, controller: &str, path: &Path) -> Result<usize> {
        let table = SymbolTable::from_elf(path)?;
        let count = table.len();
        info!(controller, path = %path.display(), symbols = count, "firmware image loaded");
        self.install(controller, table);
        Ok(count)
    }

    /// Install a pre-built table for a controller (firmware reload, tests).
    pub fn install(&self, controller: &str, table: SymbolTable) {
        let mut tables = self.tables.write().expect("symbol store lock poisoned");
        tables.insert(controller.to_string(), Arc::new(table));
    }

    pub fn table(&self, controller: &str) -> Option<Arc<SymbolTable>> {
        let tables = self.tables.read().expect("symbol store lock poisoned");
        tables.get(controller).cloned()
    }

    /// Resolve a symbol path against a controller's active firmware image.
    pub fn resolve(&self, controller: &str, path: &str) -> Result<ResolvedLocation> {
        let table = self.table(controller).ok_or_else(|| {
            GatewayError::SymbolNotFound(format!(
                "{} (no firmware image loaded for controller '{}')",
                path, controller
            ))
        })?;
        table.resolve_path(path)
    }
}
