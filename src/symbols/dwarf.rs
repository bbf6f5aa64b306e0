//! DWARF extraction of static firmware variables and their type layout.
//!
//! Walks every compilation unit for `DW_TAG_variable` entries that carry a
//! `DW_OP_addr` location (statics), then resolves each variable's type chain
//! into a [`TypeDesc`]: scalar, array, or structure with named field offsets.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use gimli::Reader as _;
use gimli::{constants, AttributeValue, Dwarf, EndianArcSlice, RunTimeEndian, SectionId, Unit, UnitOffset};
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::error::{GatewayError, Result};
use crate::symbols::{ByteOrder, ScalarKind, Symbol, TypeDesc};

type Reader = EndianArcSlice<RunTimeEndian>;
type Die<'abbrev, 'unit> = gimli::DebuggingInformationEntry<'abbrev, 'unit, Reader>;

/// Guard against pathological type reference cycles.
const MAX_TYPE_DEPTH: usize = 16;

/// Variable names injected by the vendor HAL and compiler that are never
/// useful measurement targets. Mirrors the filter applied when the memory
/// map was originally generated offline.
const EXCLUDE_PATTERNS: &[&str] = &[
    r"^RCC_.*",
    r"^GPIO_.*",
    r"^hspi\d*$",
    r"^tickstart$",
    r"^pllvco$",
    r"^prevTickFreq$",
    r"^prioritygroup$",
    r"^uwTick.*",
    r"^SystemCoreClock$",
    r"^AHBPrescTable$",
    r"^APBPrescTable$",
    r"^tmp_.*",
    r"^__.*",
];

fn is_user_defined(name: &str) -> bool {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        EXCLUDE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("static exclude pattern"))
            .collect()
    });
    !patterns.iter().any(|p| p.is_match(name))
}

/// Outcome of parsing one firmware image.
#[derive(Debug)]
pub(crate) struct ParsedImage {
    pub symbols: Vec<Symbol>,
    /// PT_LOAD ranges as (start, end-exclusive) virtual addresses.
    pub load_ranges: Vec<(u64, u64)>,
}

/// Parse a firmware ELF and extract all addressable user variables.
pub(crate) fn parse_image(data: &[u8]) -> Result<ParsedImage> {
    if data.len() < 4 || &data[..4] != b"\x7fELF" {
        return Err(GatewayError::UnsupportedFormat(
            "not an ELF image".to_string(),
        ));
    }

    let elf = goblin::elf::Elf::parse(data)?;
    let byte_order = if elf.little_endian {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    };
    let endian = match byte_order {
        ByteOrder::Little => RunTimeEndian::Little,
        ByteOrder::Big => RunTimeEndian::Big,
    };

    let load_ranges: Vec<(u64, u64)> = elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == goblin::elf::program_header::PT_LOAD && ph.p_memsz > 0)
        .map(|ph| (ph.p_vaddr, ph.p_vaddr + ph.p_memsz))
        .collect();

    let sections = collect_debug_sections(&elf, data)?;
    if !sections.contains_key(".debug_info") {
        return Err(GatewayError::MalformedImage(
            "image carries no DWARF debug info".to_string(),
        ));
    }

    let dwarf = Dwarf::load(|id| {
        Ok::<_, gimli::Error>(section_reader(&sections, id, endian))
    })?;

    let extractor = VariableExtractor {
        dwarf,
        endian,
        byte_order,
    };
    let symbols = extractor.extract()?;
    debug!(count = symbols.len(), "extracted firmware variables");

    Ok(ParsedImage {
        symbols,
        load_ranges,
    })
}

fn collect_debug_sections(
    elf: &goblin::elf::Elf<'_>,
    data: &[u8],
) -> Result<HashMap<String, Arc<[u8]>>> {
    let mut sections = HashMap::new();
    for sh in &elf.section_headers {
        let Some(name) = elf.shdr_strtab.get_at(sh.sh_name) else {
            continue;
        };
        if !name.starts_with(".debug_") {
            continue;
        }
        let Some(range) = sh.file_range() else {
            continue;
        };
        let bytes = data.get(range).ok_or_else(|| {
            GatewayError::MalformedImage(format!("section {} exceeds file size", name))
        })?;
        sections.insert(name.to_string(), Arc::<[u8]>::from(bytes.to_vec()));
    }
    Ok(sections)
}

fn section_reader(
    sections: &HashMap<String, Arc<[u8]>>,
    id: SectionId,
    endian: RunTimeEndian,
) -> Reader {
    let data = sections
        .get(id.name())
        .cloned()
        .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
    EndianArcSlice::new(data, endian)
}

struct VariableExtractor {
    dwarf: Dwarf<Reader>,
    endian: RunTimeEndian,
    byte_order: ByteOrder,
}

impl VariableExtractor {
    fn extract(&self) -> Result<Vec<Symbol>> {
        let mut symbols = Vec::new();
        let mut headers = self.dwarf.units();
        while let Some(header) = headers.next()? {
            let unit = self.dwarf.unit(header)?;
            self.extract_unit(&unit, &mut symbols)?;
        }
        Ok(symbols)
    }

    fn extract_unit(&self, unit: &Unit<Reader>, symbols: &mut Vec<Symbol>) -> Result<()> {
        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs()? {
            if entry.tag() != constants::DW_TAG_variable {
                continue;
            }
            // Declarations carry no storage.
            if entry.attr(constants::DW_AT_declaration)?.is_some() {
                continue;
            }
            let Some(name) = self.entry_name(unit, entry)? else {
                continue;
            };
            if !is_user_defined(&name) {
                trace!(%name, "skipping vendor/compiler variable");
                continue;
            }
            let Some(address) = self.static_address(unit, entry)? else {
                continue;
            };
            let ty = match entry.attr_value(constants::DW_AT_type)? {
                Some(AttributeValue::UnitRef(offset)) => self.type_at(unit, offset, 0)?,
                _ => fallback_type(4),
            };
            trace!(%name, address = format_args!("0x{:08x}", address), "variable");
            symbols.push(Symbol {
                name,
                address,
                ty,
                byte_order: self.byte_order,
            });
        }
        Ok(())
    }

    fn entry_name(&self, unit: &Unit<Reader>, entry: &Die<'_, '_>) -> Result<Option<String>> {
        let Some(attr) = entry.attr(constants::DW_AT_name)? else {
            return Ok(None);
        };
        let reader = self.dwarf.attr_string(unit, attr.value())?;
        Ok(Some(reader.to_string_lossy()?.into_owned()))
    }

    /// Decode a `DW_OP_addr` location expression into a physical address.
    /// Variables with register or computed locations are not addressable
    /// over the wire and are skipped.
    fn static_address(&self, unit: &Unit<Reader>, entry: &Die<'_, '_>) -> Result<Option<u32>> {
        let Some(AttributeValue::Exprloc(expr)) = entry.attr_value(constants::DW_AT_location)?
        else {
            return Ok(None);
        };
        let bytes = expr.0.to_slice()?;
        if bytes.first() != Some(&constants::DW_OP_addr.0) {
            return Ok(None);
        }
        let addr_size = unit.header.encoding().address_size as usize;
        let Some(raw) = bytes.get(1..1 + addr_size) else {
            return Ok(None);
        };
        let mut value: u64 = 0;
        match self.endian {
            RunTimeEndian::Little => {
                for (i, b) in raw.iter().enumerate() {
                    value |= (*b as u64) << (i * 8);
                }
            }
            RunTimeEndian::Big => {
                for b in raw {
                    value = (value << 8) | *b as u64;
                }
            }
        }
        Ok(u32::try_from(value).ok())
    }

    fn type_at(&self, unit: &Unit<Reader>, offset: UnitOffset, depth: usize) -> Result<TypeDesc> {
        if depth >= MAX_TYPE_DEPTH {
            return Ok(fallback_type(4));
        }
        let entry = unit.entry(offset)?;
        match entry.tag() {
            constants::DW_TAG_typedef
            | constants::DW_TAG_const_type
            | constants::DW_TAG_volatile_type
            | constants::DW_TAG_restrict_type => match entry.attr_value(constants::DW_AT_type)? {
                Some(AttributeValue::UnitRef(inner)) => self.type_at(unit, inner, depth + 1),
                _ => Ok(fallback_type(4)),
            },
            constants::DW_TAG_base_type => {
                let size = self.byte_size(&entry)?.unwrap_or(4);
                let kind = match entry.attr_value(constants::DW_AT_encoding)? {
                    Some(AttributeValue::Encoding(enc)) => match enc {
                        constants::DW_ATE_float => ScalarKind::Float,
                        constants::DW_ATE_signed | constants::DW_ATE_signed_char => {
                            ScalarKind::Signed
                        }
                        constants::DW_ATE_boolean => ScalarKind::Bool,
                        _ => ScalarKind::Unsigned,
                    },
                    _ => ScalarKind::Unsigned,
                };
                Ok(TypeDesc::Scalar { kind, size })
            }
            constants::DW_TAG_pointer_type => Ok(TypeDesc::Scalar {
                kind: ScalarKind::Unsigned,
                size: unit.header.encoding().address_size as u32,
            }),
            constants::DW_TAG_enumeration_type => Ok(TypeDesc::Scalar {
                kind: ScalarKind::Unsigned,
                size: self.byte_size(&entry)?.unwrap_or(4),
            }),
            constants::DW_TAG_array_type => {
                let elem = match entry.attr_value(constants::DW_AT_type)? {
                    Some(AttributeValue::UnitRef(inner)) => self.type_at(unit, inner, depth + 1)?,
                    _ => fallback_type(1),
                };
                let count = self.array_count(unit, offset)?.unwrap_or(1);
                Ok(TypeDesc::Array {
                    elem: Box::new(elem),
                    count,
                })
            }
            constants::DW_TAG_structure_type
            | constants::DW_TAG_class_type
            | constants::DW_TAG_union_type => {
                let size = self.byte_size(&entry)?.unwrap_or(0);
                let fields = self.struct_fields(unit, offset, size, depth)?;
                Ok(TypeDesc::Struct { size, fields })
            }
            tag => {
                trace!(?tag, "unhandled type tag, treating as opaque word");
                Ok(fallback_type(self.byte_size(&entry)?.unwrap_or(4)))
            }
        }
    }

    fn byte_size(&self, entry: &Die<'_, '_>) -> Result<Option<u32>> {
        let Some(attr) = entry.attr(constants::DW_AT_byte_size)? else {
            return Ok(None);
        };
        Ok(attr.udata_value().map(|v| v as u32))
    }

    fn array_count(&self, unit: &Unit<Reader>, offset: UnitOffset) -> Result<Option<u32>> {
        let mut tree = unit.entries_tree(Some(offset))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            if entry.tag() != constants::DW_TAG_subrange_type {
                continue;
            }
            if let Some(attr) = entry.attr(constants::DW_AT_count)? {
                return Ok(attr.udata_value().map(|v| v as u32));
            }
            if let Some(attr) = entry.attr(constants::DW_AT_upper_bound)? {
                return Ok(attr.udata_value().map(|v| v as u32 + 1));
            }
        }
        Ok(None)
    }

    fn struct_fields(
        &self,
        unit: &Unit<Reader>,
        offset: UnitOffset,
        parent_size: u32,
        depth: usize,
    ) -> Result<Vec<crate::symbols::StructField>> {
        let mut fields = Vec::new();
        let mut tree = unit.entries_tree(Some(offset))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let entry = child.entry().clone();
            if entry.tag() != constants::DW_TAG_member {
                continue;
            }
            let Some(name) = self.entry_name(unit, &entry)? else {
                continue;
            };
            // Bitfield members carry bit offsets instead; those cannot be
            // addressed through the byte-granular transfer protocol.
            let field_offset = match entry.attr(constants::DW_AT_data_member_location)? {
                Some(attr) => match attr.udata_value() {
                    Some(v) => v as u32,
                    None => continue,
                },
                None => 0,
            };
            if parent_size > 0 && field_offset >= parent_size {
                warn!(
                    field = %name,
                    offset = field_offset,
                    parent_size,
                    "field offset outside parent, dropping"
                );
                continue;
            }
            let ty = match entry.attr_value(constants::DW_AT_type)? {
                Some(AttributeValue::UnitRef(inner)) => self.type_at(unit, inner, depth + 1)?,
                _ => fallback_type(4),
            };
            fields.push(crate::symbols::StructField {
                name,
                offset: field_offset,
                ty,
            });
        }
        Ok(fields)
    }
}

fn fallback_type(size: u32) -> TypeDesc {
    TypeDesc::Scalar {
        kind: ScalarKind::Unsigned,
        size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_defined_filter() {
        assert!(is_user_defined("charger_voltage"));
        assert!(is_user_defined("port_state"));
        assert!(!is_user_defined("RCC_ClkInitStruct"));
        assert!(!is_user_defined("GPIO_InitStruct"));
        assert!(!is_user_defined("tmp_buffer"));
        assert!(!is_user_defined("__libc_init"));
    }

    #[test]
    fn test_non_elf_rejected() {
        let err = parse_image(b"not an elf file").unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_truncated_elf_rejected() {
        // Valid magic, garbage remainder.
        let mut data = b"\x7fELF".to_vec();
        data.extend_from_slice(&[0u8; 8]);
        let err = parse_image(&data).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedImage(_)));
    }

    /// Build the debug sections of a little firmware image: a typedef'd
    /// scalar, a signed array, a two-field struct, a vendor variable the
    /// filter must drop, and one variable outside the loadable range.
    fn build_firmware_dwarf() -> Vec<(String, Vec<u8>)> {
        use gimli::write::{Address, AttributeValue, DwarfUnit, EndianVec, Expression, Sections};

        let encoding = gimli::Encoding {
            format: gimli::Format::Dwarf32,
            version: 4,
            address_size: 4,
        };
        let mut dwarf = DwarfUnit::new(encoding);
        let root = dwarf.unit.root();

        let u32_ty = dwarf.unit.add(root, constants::DW_TAG_base_type);
        let die = dwarf.unit.get_mut(u32_ty);
        die.set(
            constants::DW_AT_name,
            AttributeValue::String(b"unsigned int".to_vec()),
        );
        die.set(constants::DW_AT_byte_size, AttributeValue::Udata(4));
        die.set(
            constants::DW_AT_encoding,
            AttributeValue::Encoding(constants::DW_ATE_unsigned),
        );

        let i16_ty = dwarf.unit.add(root, constants::DW_TAG_base_type);
        let die = dwarf.unit.get_mut(i16_ty);
        die.set(
            constants::DW_AT_name,
            AttributeValue::String(b"short".to_vec()),
        );
        die.set(constants::DW_AT_byte_size, AttributeValue::Udata(2));
        die.set(
            constants::DW_AT_encoding,
            AttributeValue::Encoding(constants::DW_ATE_signed),
        );

        let f32_ty = dwarf.unit.add(root, constants::DW_TAG_base_type);
        let die = dwarf.unit.get_mut(f32_ty);
        die.set(
            constants::DW_AT_name,
            AttributeValue::String(b"float".to_vec()),
        );
        die.set(constants::DW_AT_byte_size, AttributeValue::Udata(4));
        die.set(
            constants::DW_AT_encoding,
            AttributeValue::Encoding(constants::DW_ATE_float),
        );

        let vcell_ty = dwarf.unit.add(root, constants::DW_TAG_typedef);
        let die = dwarf.unit.get_mut(vcell_ty);
        die.set(
            constants::DW_AT_name,
            AttributeValue::String(b"vcell_t".to_vec()),
        );
        die.set(constants::DW_AT_type, AttributeValue::UnitRef(u32_ty));

        let temps_ty = dwarf.unit.add(root, constants::DW_TAG_array_type);
        dwarf
            .unit
            .get_mut(temps_ty)
            .set(constants::DW_AT_type, AttributeValue::UnitRef(i16_ty));
        let subrange = dwarf.unit.add(temps_ty, constants::DW_TAG_subrange_type);
        dwarf
            .unit
            .get_mut(subrange)
            .set(constants::DW_AT_upper_bound, AttributeValue::Udata(7));

        let port_ty = dwarf.unit.add(root, constants::DW_TAG_structure_type);
        let die = dwarf.unit.get_mut(port_ty);
        die.set(
            constants::DW_AT_name,
            AttributeValue::String(b"PortStatus".to_vec()),
        );
        die.set(constants::DW_AT_byte_size, AttributeValue::Udata(8));
        let member = dwarf.unit.add(port_ty, constants::DW_TAG_member);
        let die = dwarf.unit.get_mut(member);
        die.set(
            constants::DW_AT_name,
            AttributeValue::String(b"state".to_vec()),
        );
        die.set(constants::DW_AT_type, AttributeValue::UnitRef(u32_ty));
        die.set(constants::DW_AT_data_member_location, AttributeValue::Udata(0));
        let member = dwarf.unit.add(port_ty, constants::DW_TAG_member);
        let die = dwarf.unit.get_mut(member);
        die.set(
            constants::DW_AT_name,
            AttributeValue::String(b"current".to_vec()),
        );
        die.set(constants::DW_AT_type, AttributeValue::UnitRef(f32_ty));
        die.set(constants::DW_AT_data_member_location, AttributeValue::Udata(4));

        let mut add_variable = |name: &[u8], ty, address: u64| {
            let id = dwarf.unit.add(root, constants::DW_TAG_variable);
            let die = dwarf.unit.get_mut(id);
            die.set(constants::DW_AT_name, AttributeValue::String(name.to_vec()));
            die.set(constants::DW_AT_type, AttributeValue::UnitRef(ty));
            let mut location = Expression::new();
            location.op_addr(Address::Constant(address));
            die.set(constants::DW_AT_location, AttributeValue::Exprloc(location));
        };
        add_variable(b"charge_voltage", vcell_ty, 0x2000_0010);
        add_variable(b"cell_temps", temps_ty, 0x2000_0020);
        add_variable(b"port_status", port_ty, 0x2000_0030);
        add_variable(b"GPIO_InitStruct", u32_ty, 0x2000_0040);
        add_variable(b"boot_count", u32_ty, 0x9000_0000);
        drop(add_variable);

        let mut sections = Sections::new(EndianVec::new(gimli::LittleEndian));
        dwarf.write(&mut sections).unwrap();
        let mut out = Vec::new();
        sections
            .for_each(|id, data| {
                if !data.slice().is_empty() {
                    out.push((id.name().to_string(), data.slice().to_vec()));
                }
                Ok::<_, gimli::Error>(())
            })
            .unwrap();
        out
    }

    /// Wrap debug sections in a minimal little-endian ELF32 with one
    /// PT_LOAD segment covering 0x2000_0000..0x2000_1000.
    fn wrap_elf32(debug_sections: &[(String, Vec<u8>)]) -> Vec<u8> {
        // Null section + the debug sections + .shstrtab.
        let shnum = debug_sections.len() as u32 + 2;
        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for (name, _) in debug_sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");

        let data_start = 52 + 32u32;
        let mut payload = Vec::new();
        let mut section_offsets = Vec::new();
        for (_, data) in debug_sections {
            section_offsets.push(data_start + payload.len() as u32);
            payload.extend_from_slice(data);
        }
        let shstrtab_offset = data_start + payload.len() as u32;
        payload.extend_from_slice(&shstrtab);
        let shoff = data_start + payload.len() as u32;

        let mut out = Vec::new();
        out.extend_from_slice(b"\x7fELF\x01\x01\x01");
        out.extend_from_slice(&[0u8; 9]);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&40u16.to_le_bytes()); // EM_ARM
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_entry
        out.extend_from_slice(&52u32.to_le_bytes()); // e_phoff
        out.extend_from_slice(&shoff.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
        out.extend_from_slice(&32u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&(shnum as u16).to_le_bytes());
        out.extend_from_slice(&((shnum - 1) as u16).to_le_bytes()); // e_shstrndx

        // PT_LOAD: p_type, p_offset, p_vaddr, p_paddr, p_filesz, p_memsz,
        // p_flags, p_align.
        for word in [1u32, 0, 0x2000_0000, 0x2000_0000, 0, 0x1000, 6, 4] {
            out.extend_from_slice(&word.to_le_bytes());
        }

        out.extend_from_slice(&payload);

        // Section headers: sh_name, sh_type, sh_flags, sh_addr, sh_offset,
        // sh_size, sh_link, sh_info, sh_addralign, sh_entsize.
        let mut shdr = |out: &mut Vec<u8>, name: u32, ty: u32, offset: u32, size: u32| {
            for word in [name, ty, 0, 0, offset, size, 0, 0, 1, 0] {
                out.extend_from_slice(&word.to_le_bytes());
            }
        };
        shdr(&mut out, 0, 0, 0, 0);
        for (i, (_, data)) in debug_sections.iter().enumerate() {
            // SHT_PROGBITS
            shdr(
                &mut out,
                name_offsets[i],
                1,
                section_offsets[i],
                data.len() as u32,
            );
        }
        // SHT_STRTAB
        shdr(
            &mut out,
            shstrtab_name,
            3,
            shstrtab_offset,
            shstrtab.len() as u32,
        );
        out
    }

    #[test]
    fn test_extracts_variables_and_types() {
        let elf = wrap_elf32(&build_firmware_dwarf());
        let parsed = parse_image(&elf).unwrap();
        assert_eq!(parsed.load_ranges, vec![(0x2000_0000, 0x2000_1000)]);

        let find = |name: &str| parsed.symbols.iter().find(|s| s.name == name);
        assert!(find("GPIO_InitStruct").is_none(), "vendor variable kept");

        let voltage = find("charge_voltage").expect("charge_voltage");
        assert_eq!(voltage.address, 0x2000_0010);
        assert!(matches!(
            voltage.ty,
            TypeDesc::Scalar {
                kind: ScalarKind::Unsigned,
                size: 4
            }
        ));
        assert_eq!(voltage.byte_order, ByteOrder::Little);

        let temps = find("cell_temps").expect("cell_temps");
        assert_eq!(temps.address, 0x2000_0020);
        let TypeDesc::Array { elem, count } = &temps.ty else {
            panic!("cell_temps is not an array");
        };
        assert_eq!(*count, 8);
        assert!(matches!(
            **elem,
            TypeDesc::Scalar {
                kind: ScalarKind::Signed,
                size: 2
            }
        ));

        let port = find("port_status").expect("port_status");
        assert_eq!(port.address, 0x2000_0030);
        let TypeDesc::Struct { size, fields } = &port.ty else {
            panic!("port_status is not a struct");
        };
        assert_eq!(*size, 8);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "state");
        assert_eq!(fields[0].offset, 0);
        assert_eq!(fields[1].name, "current");
        assert_eq!(fields[1].offset, 4);
        assert!(matches!(
            fields[1].ty,
            TypeDesc::Scalar {
                kind: ScalarKind::Float,
                size: 4
            }
        ));
    }

    #[test]
    fn test_table_drops_symbols_outside_load_ranges() {
        let elf = wrap_elf32(&build_firmware_dwarf());
        let table = crate::symbols::SymbolTable::from_elf_bytes(&elf).unwrap();

        // boot_count lives at 0x9000_0000, outside the single PT_LOAD.
        assert_eq!(table.len(), 3);
        assert!(table.lookup("boot_count").is_err());

        let loc = table.resolve_path("cell_temps[3]").unwrap();
        assert_eq!(loc.address, 0x2000_0026);
        assert_eq!(loc.size, 2);

        let loc = table.resolve_path("port_status.current").unwrap();
        assert_eq!(loc.address, 0x2000_0034);
        assert_eq!(loc.size, 4);
    }
}
