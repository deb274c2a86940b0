// Lua 5.1 binary chunks (luac output)
//
// Layout: a 12-byte header, then the main function recursively:
//   source, linedefined, lastlinedefined, nups, numparams, is_vararg,
//   maxstacksize, code, constants, nested prototypes, lineinfo, locvars,
//   upvalue names.
// `int` and `size_t` widths plus byte order come from the header; numbers
// are 8-byte doubles (or integers when the integral flag is set).

use std::io::{Cursor, Read};
use std::rc::Rc;

use smol_str::SmolStr;

use super::{LocalVar, LuaValue, Prototype};
use crate::lua_vm::{Instruction, LuaError, LuaResult};

const LUA_SIGNATURE: &[u8] = b"\x1bLua";
const LUAC_VERSION: u8 = 0x51;
const LUAC_FORMAT: u8 = 0;
const HEADER_SIZE: usize = 12;

const TNIL: u8 = 0;
const TBOOLEAN: u8 = 1;
const TNUMBER: u8 = 3;
const TSTRING: u8 = 4;

fn bad(why: &str) -> LuaError {
    LuaError::runtime(format!("binary chunk: {} in precompiled chunk", why))
}

struct ChunkReader<'a> {
    cursor: Cursor<&'a [u8]>,
    little_endian: bool,
    int_size: usize,
    size_t_size: usize,
    number_size: usize,
    integral: bool,
}

impl<'a> ChunkReader<'a> {
    fn bytes<const N: usize>(&mut self) -> LuaResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| bad("unexpected end"))?;
        Ok(buf)
    }

    fn byte(&mut self) -> LuaResult<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    /// Unsigned value of `size` bytes in the chunk's byte order.
    fn sized(&mut self, size: usize) -> LuaResult<u64> {
        let mut buf = [0u8; 8];
        self.cursor
            .read_exact(&mut buf[..size])
            .map_err(|_| bad("unexpected end"))?;
        if !self.little_endian {
            buf[..size].reverse();
        }
        Ok(u64::from_le_bytes(buf))
    }

    fn int(&mut self) -> LuaResult<i64> {
        let raw = self.sized(self.int_size)?;
        let shift = 64 - 8 * self.int_size as u32;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// A non-negative `int` used as a count.
    fn count(&mut self) -> LuaResult<usize> {
        let n = self.int()?;
        let remaining = self.cursor.get_ref().len() as u64 - self.cursor.position();
        if n < 0 || n as u64 > remaining {
            return Err(bad("bad integer"));
        }
        Ok(n as usize)
    }

    fn number(&mut self) -> LuaResult<LuaValue> {
        let raw = self.sized(self.number_size)?;
        Ok(match (self.integral, self.number_size) {
            (true, size) => {
                let shift = 64 - 8 * size as u32;
                LuaValue::Integer(((raw << shift) as i64) >> shift)
            }
            (false, 4) => LuaValue::number(f32::from_bits(raw as u32) as f64),
            (false, _) => LuaValue::number(f64::from_bits(raw)),
        })
    }

    /// A `size_t`-prefixed string; the length counts the trailing NUL and
    /// zero means "no string".
    fn string(&mut self) -> LuaResult<Option<SmolStr>> {
        let len = self.sized(self.size_t_size)?;
        if len == 0 {
            return Ok(None);
        }
        let remaining = self.cursor.get_ref().len() as u64 - self.cursor.position();
        if len > remaining {
            return Err(bad("unexpected end"));
        }
        let mut buf = vec![0u8; len as usize];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| bad("unexpected end"))?;
        buf.pop();
        Ok(Some(SmolStr::new(String::from_utf8_lossy(&buf))))
    }

    fn header(&mut self) -> LuaResult<()> {
        let header = self.bytes::<HEADER_SIZE>()?;
        if &header[..4] != LUA_SIGNATURE {
            return Err(bad("bad header"));
        }
        if header[4] != LUAC_VERSION || header[5] != LUAC_FORMAT {
            return Err(bad("bad version"));
        }
        self.little_endian = match header[6] {
            0 => false,
            1 => true,
            _ => return Err(bad("bad header")),
        };
        self.int_size = header[7] as usize;
        self.size_t_size = header[8] as usize;
        self.number_size = header[10] as usize;
        self.integral = header[11] != 0;
        let widths_ok = matches!(self.int_size, 1..=8)
            && matches!(self.size_t_size, 1..=8)
            && header[9] == 4
            && if self.integral {
                matches!(self.number_size, 1..=8)
            } else {
                matches!(self.number_size, 4 | 8)
            };
        if !widths_ok {
            return Err(bad("bad header"));
        }
        Ok(())
    }

    fn function(&mut self, parent_source: &SmolStr) -> LuaResult<Prototype> {
        let source = self.string()?.unwrap_or_else(|| parent_source.clone());
        let line_defined = self.int()? as u32;
        let last_line_defined = self.int()? as u32;
        let num_upvalues = self.byte()?;
        let num_params = self.byte()?;
        let vararg_flags = self.byte()?;
        let max_stack_size = self.byte()?;

        let n = self.count()?;
        let mut code = Vec::with_capacity(n);
        for _ in 0..n {
            let word = Instruction::from_u32(self.sized(4)? as u32);
            if word.get_opcode().is_none() {
                return Err(bad("bad code"));
            }
            code.push(word);
        }

        let n = self.count()?;
        let mut constants = Vec::with_capacity(n);
        for _ in 0..n {
            constants.push(match self.byte()? {
                TNIL => LuaValue::Nil,
                TBOOLEAN => LuaValue::Boolean(self.byte()? != 0),
                TNUMBER => self.number()?,
                TSTRING => LuaValue::String(self.string()?.unwrap_or_default().as_str().into()),
                _ => return Err(bad("bad constant")),
            });
        }

        let n = self.count()?;
        let mut protos = Vec::with_capacity(n);
        for _ in 0..n {
            protos.push(Rc::new(self.function(&source)?));
        }

        let n = self.count()?;
        let mut line_info = Vec::with_capacity(n);
        for _ in 0..n {
            line_info.push(self.int()? as u32);
        }

        let n = self.count()?;
        let mut locals = Vec::with_capacity(n);
        for _ in 0..n {
            let name = self.string()?.unwrap_or_default();
            let start_pc = self.int()? as u32;
            let end_pc = self.int()? as u32;
            locals.push(LocalVar {
                name,
                start_pc,
                end_pc,
            });
        }

        let n = self.count()?;
        let mut upvalue_names = Vec::with_capacity(n);
        for _ in 0..n {
            upvalue_names.push(self.string()?.unwrap_or_default());
        }

        Ok(Prototype {
            source,
            line_defined,
            last_line_defined,
            num_upvalues,
            num_params,
            vararg_flags,
            max_stack_size,
            code,
            constants,
            protos,
            line_info,
            locals,
            upvalue_names,
        })
    }
}

/// Whether `data` starts with the binary chunk signature.
pub fn is_binary_chunk(data: &[u8]) -> bool {
    data.starts_with(LUA_SIGNATURE)
}

/// Load the main function of a Lua 5.1 binary chunk.
pub fn undump(data: &[u8]) -> LuaResult<Rc<Prototype>> {
    let mut reader = ChunkReader {
        cursor: Cursor::new(data),
        little_endian: true,
        int_size: 4,
        size_t_size: 8,
        number_size: 8,
        integral: false,
    };
    reader.header()?;
    let main = reader.function(&SmolStr::new_inline("=?"))?;
    Ok(Rc::new(main))
}

fn write_int(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&(v as i32).to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: Option<&str>) {
    match s {
        None => buf.extend_from_slice(&0u64.to_le_bytes()),
        Some(s) => {
            buf.extend_from_slice(&(s.len() as u64 + 1).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
    }
}

fn write_function(buf: &mut Vec<u8>, proto: &Prototype, parent_source: Option<&str>, strip: bool) {
    if strip || parent_source == Some(proto.source.as_str()) {
        write_string(buf, None);
    } else {
        write_string(buf, Some(proto.source.as_str()));
    }
    write_int(buf, proto.line_defined as i64);
    write_int(buf, proto.last_line_defined as i64);
    buf.push(proto.num_upvalues);
    buf.push(proto.num_params);
    buf.push(proto.vararg_flags);
    buf.push(proto.max_stack_size);

    write_int(buf, proto.code.len() as i64);
    for instr in &proto.code {
        buf.extend_from_slice(&instr.as_u32().to_le_bytes());
    }

    write_int(buf, proto.constants.len() as i64);
    for constant in &proto.constants {
        match constant {
            LuaValue::Boolean(b) => {
                buf.push(TBOOLEAN);
                buf.push(*b as u8);
            }
            LuaValue::Integer(i) => {
                buf.push(TNUMBER);
                buf.extend_from_slice(&(*i as f64).to_le_bytes());
            }
            LuaValue::Float(f) => {
                buf.push(TNUMBER);
                buf.extend_from_slice(&f.to_le_bytes());
            }
            LuaValue::String(s) => {
                buf.push(TSTRING);
                write_string(buf, Some(s.as_str()));
            }
            _ => buf.push(TNIL),
        }
    }

    write_int(buf, proto.protos.len() as i64);
    for child in &proto.protos {
        write_function(buf, child, Some(proto.source.as_str()), strip);
    }

    if strip {
        write_int(buf, 0);
        write_int(buf, 0);
        write_int(buf, 0);
        return;
    }
    write_int(buf, proto.line_info.len() as i64);
    for line in &proto.line_info {
        write_int(buf, *line as i64);
    }
    write_int(buf, proto.locals.len() as i64);
    for local in &proto.locals {
        write_string(buf, Some(local.name.as_str()));
        write_int(buf, local.start_pc as i64);
        write_int(buf, local.end_pc as i64);
    }
    write_int(buf, proto.upvalue_names.len() as i64);
    for name in &proto.upvalue_names {
        write_string(buf, Some(name.as_str()));
    }
}

/// Write `proto` as a little-endian binary chunk with 4-byte `int`,
/// 8-byte `size_t` and double numbers. `strip` drops debug information.
pub fn dump(proto: &Prototype, strip: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + proto.code.len() * 4 + 64);
    buf.extend_from_slice(LUA_SIGNATURE);
    buf.extend_from_slice(&[LUAC_VERSION, LUAC_FORMAT, 1, 4, 8, 4, 8, 0]);
    write_function(&mut buf, proto, None, strip);
    buf
}
