//! Decoder for the kyc container: the tagged, little-endian serialisation of a compiled
//! module emitted by the external compiler.

use crate::bytecode::{CodeFlags, CodeObject, ConstantData};

pub const MAGIC: &[u8; 3] = b"KYC";
pub const FORMAT_VERSION: u8 = b'A';

mod tag {
    pub(super) const NONE: u8 = b'N';
    pub(super) const TRUE: u8 = b'+';
    pub(super) const FALSE: u8 = b'-';
    pub(super) const INT: u8 = b'i';
    pub(super) const LONG: u8 = b'L';
    pub(super) const FLOAT: u8 = b'f';
    pub(super) const COMPLEX: u8 = b'y';
    pub(super) const BYTES: u8 = b'b';
    pub(super) const STRING: u8 = b's';
    pub(super) const TUPLE: u8 = b't';
    pub(super) const LIST: u8 = b'l';
    pub(super) const SET: u8 = b'{';
    pub(super) const FROZENSET: u8 = b'>';
    pub(super) const DICT: u8 = b'd';
    pub(super) const CODE: u8 = b'c';
    pub(super) const FILE: u8 = b'K';
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KycError {
    #[error("bad magic number, expected KYC")]
    BadMagic,
    #[error("unsupported kyc format version {0:?}")]
    UnsupportedVersion(char),
    #[error("unknown kyc tag {tag:?} at offset {offset}")]
    UnknownTag { tag: char, offset: usize },
    #[error("kyc data truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("invalid UTF-8 in kyc string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("negative length {length} at offset {offset}")]
    NegativeLength { length: i32, offset: usize },
    #[error("code object field {field} must be {expected}")]
    UnexpectedKind {
        field: &'static str,
        expected: &'static str,
    },
    #[error("code object {name} declares {params} parameters but has {varnames} local names")]
    BadParameterCount {
        name: String,
        params: usize,
        varnames: usize,
    },
    #[error("a file wrapper may only appear at the top level")]
    NestedFile,
    #[error("top-level kyc object is not a file wrapper")]
    NotAFile,
}

/// A decoded kyc container.
#[derive(Debug, Clone, PartialEq)]
pub struct KycFile {
    /// Python minor version byte recorded by the compiler (`9` for 3.9).
    pub python_version: u8,
    pub hash: i64,
    pub comment: String,
    pub code: CodeObject,
}

pub fn parse_kyc_file(data: &[u8]) -> Result<KycFile, KycError> {
    let mut rdr = Reader { data, pos: 0 };
    if rdr.read_slice(3)? != MAGIC {
        return Err(KycError::BadMagic);
    }
    let version = rdr.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(KycError::UnsupportedVersion(char::from(version)));
    }
    let python_version = rdr.read_u8()?;
    if rdr.read_u8()? != tag::FILE {
        return Err(KycError::NotAFile);
    }
    let file = rdr.read_file(python_version)?;
    log::debug!(
        "decoded kyc container for {:?} ({} bytes, python 3.{})",
        file.code.filename,
        data.len(),
        python_version
    );
    Ok(file)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read_slice(&mut self, n: usize) -> Result<&'a [u8], KycError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(KycError::Truncated { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], KycError> {
        let mut buf = [0; N];
        buf.copy_from_slice(self.read_slice(N)?);
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8, KycError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_i32(&mut self) -> Result<i32, KycError> {
        self.read_array().map(i32::from_le_bytes)
    }

    fn read_i64(&mut self) -> Result<i64, KycError> {
        self.read_array().map(i64::from_le_bytes)
    }

    fn read_f64(&mut self) -> Result<f64, KycError> {
        self.read_array().map(f64::from_le_bytes)
    }

    fn read_len(&mut self) -> Result<usize, KycError> {
        let offset = self.pos;
        let length = self.read_i32()?;
        usize::try_from(length).map_err(|_| KycError::NegativeLength { length, offset })
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, KycError> {
        let len = self.read_len()?;
        Ok(self.read_slice(len)?.to_vec())
    }

    fn read_str(&mut self) -> Result<String, KycError> {
        let len = self.read_len()?;
        let offset = self.pos;
        let bytes = self.read_slice(len)?;
        core::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| KycError::InvalidUtf8 { offset })
    }

    fn read_sequence(&mut self) -> Result<Vec<ConstantData>, KycError> {
        let len = self.read_len()?;
        (0..len).map(|_| self.read_object()).collect()
    }

    fn read_object(&mut self) -> Result<ConstantData, KycError> {
        let offset = self.pos;
        let value = match self.read_u8()? {
            tag::NONE => ConstantData::None,
            tag::TRUE => ConstantData::Boolean { value: true },
            tag::FALSE => ConstantData::Boolean { value: false },
            tag::INT => ConstantData::Integer {
                value: self.read_i32()?.into(),
            },
            tag::LONG => ConstantData::Integer {
                value: self.read_i64()?,
            },
            tag::FLOAT => ConstantData::Float {
                value: self.read_f64()?,
            },
            tag::COMPLEX => ConstantData::Complex {
                real: self.read_f64()?,
                imag: self.read_f64()?,
            },
            tag::BYTES => ConstantData::Bytes {
                value: self.read_bytes()?,
            },
            tag::STRING => ConstantData::Str {
                value: self.read_str()?,
            },
            tag::TUPLE => ConstantData::Tuple {
                elements: self.read_sequence()?,
            },
            tag::LIST => ConstantData::List {
                elements: self.read_sequence()?,
            },
            tag::SET => ConstantData::Set {
                elements: self.read_sequence()?,
            },
            tag::FROZENSET => ConstantData::FrozenSet {
                elements: self.read_sequence()?,
            },
            tag::DICT => {
                let len = self.read_len()?;
                let entries = (0..len)
                    .map(|_| -> Result<_, KycError> {
                        Ok((self.read_object()?, self.read_object()?))
                    })
                    .collect::<Result<_, _>>()?;
                ConstantData::Dict { entries }
            }
            tag::CODE => ConstantData::Code {
                code: Box::new(self.read_code()?),
            },
            tag::FILE => return Err(KycError::NestedFile),
            other => {
                return Err(KycError::UnknownTag {
                    tag: char::from(other),
                    offset,
                });
            }
        };
        Ok(value)
    }

    fn read_int_field(&mut self, field: &'static str) -> Result<u32, KycError> {
        match self.read_object()? {
            ConstantData::Integer { value } => {
                u32::try_from(value).map_err(|_| KycError::UnexpectedKind {
                    field,
                    expected: "a non-negative int",
                })
            }
            _ => Err(KycError::UnexpectedKind {
                field,
                expected: "an int",
            }),
        }
    }

    fn read_str_field(&mut self, field: &'static str) -> Result<String, KycError> {
        match self.read_object()? {
            ConstantData::Str { value } => Ok(value),
            _ => Err(KycError::UnexpectedKind {
                field,
                expected: "a string",
            }),
        }
    }

    fn read_bytes_field(&mut self, field: &'static str) -> Result<Vec<u8>, KycError> {
        match self.read_object()? {
            ConstantData::Bytes { value } => Ok(value),
            _ => Err(KycError::UnexpectedKind {
                field,
                expected: "bytes",
            }),
        }
    }

    /// Reads a tuple field; any other single value is treated as a one-element tuple.
    fn read_tuple_field(&mut self) -> Result<Vec<ConstantData>, KycError> {
        Ok(match self.read_object()? {
            ConstantData::Tuple { elements } => elements,
            other => vec![other],
        })
    }

    fn read_names_field(&mut self, field: &'static str) -> Result<Vec<String>, KycError> {
        self.read_tuple_field()?
            .into_iter()
            .map(|name| match name {
                ConstantData::Str { value } => Ok(value),
                _ => Err(KycError::UnexpectedKind {
                    field,
                    expected: "a tuple of strings",
                }),
            })
            .collect()
    }

    fn read_code(&mut self) -> Result<CodeObject, KycError> {
        let argcount = self.read_int_field("co_argcount")?;
        let posonlyargcount = self.read_int_field("co_posonlyargcount")?;
        let kwonlyargcount = self.read_int_field("co_kwonlyargcount")?;
        let nlocals = self.read_int_field("co_nlocals")?;
        let stacksize = self.read_int_field("co_stacksize")?;
        let flags = CodeFlags::from_bits_retain(self.read_int_field("co_flags")?);
        let code = self.read_bytes_field("co_code")?;
        let constants = self.read_tuple_field()?;
        let names = self.read_names_field("co_names")?;
        let varnames = self.read_names_field("co_varnames")?;
        let freevars = self.read_names_field("co_freevars")?;
        let cellvars = self.read_names_field("co_cellvars")?;
        let filename = self.read_str_field("co_filename")?;
        let name = self.read_str_field("co_name")?;
        let firstlineno = self.read_int_field("co_firstlineno")?;
        let lnotab = self.read_bytes_field("co_lnotab")?;
        let params = argcount as usize
            + kwonlyargcount as usize
            + usize::from(flags.contains(CodeFlags::VARARGS))
            + usize::from(flags.contains(CodeFlags::VARKEYWORDS));
        if posonlyargcount > argcount || params > varnames.len() {
            return Err(KycError::BadParameterCount {
                name,
                params,
                varnames: varnames.len(),
            });
        }
        Ok(CodeObject {
            argcount,
            posonlyargcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            code,
            constants,
            names,
            varnames,
            freevars,
            cellvars,
            filename,
            name,
            firstlineno,
            lnotab,
        })
    }

    fn read_file(&mut self, python_version: u8) -> Result<KycFile, KycError> {
        let hash = match self.read_object()? {
            ConstantData::Integer { value } => value,
            _ => {
                return Err(KycError::UnexpectedKind {
                    field: "hash",
                    expected: "an int",
                });
            }
        };
        let comment = self.read_str_field("comment")?;
        let code = match self.read_object()? {
            ConstantData::Code { code } => *code,
            _ => {
                return Err(KycError::UnexpectedKind {
                    field: "code",
                    expected: "a code object",
                });
            }
        };
        Ok(KycFile {
            python_version,
            hash,
            comment,
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    #[derive(Default)]
    struct Writer(Vec<u8>);

    impl Writer {
        fn tag(&mut self, t: u8) -> &mut Self {
            self.0.push(t);
            self
        }
        fn int(&mut self, v: i32) -> &mut Self {
            self.tag(tag::INT);
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }
        fn long(&mut self, v: i64) -> &mut Self {
            self.tag(tag::LONG);
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }
        fn sized(&mut self, t: u8, data: &[u8]) -> &mut Self {
            self.tag(t);
            self.0.extend_from_slice(&(data.len() as i32).to_le_bytes());
            self.0.extend_from_slice(data);
            self
        }
        fn str(&mut self, s: &str) -> &mut Self {
            self.sized(tag::STRING, s.as_bytes())
        }
        fn tuple_header(&mut self, len: i32) -> &mut Self {
            self.tag(tag::TUPLE);
            self.0.extend_from_slice(&len.to_le_bytes());
            self
        }
    }

    /// `x = 1` compiled as a module.
    fn module_bytes() -> Vec<u8> {
        code_bytes([0, 0, 0, 0, 1, 0x40], &[])
    }

    /// The `x = 1` body under the given argcount, posonlyargcount, kwonlyargcount, nlocals,
    /// stacksize and flags header, with `varnames` as the local names.
    fn code_bytes(header: [i32; 6], varnames: &[&str]) -> Vec<u8> {
        let mut w = Writer::default();
        w.0.extend_from_slice(b"KYCA\x09");
        w.tag(tag::FILE).long(-42).str("test");
        w.tag(tag::CODE);
        for field in header {
            w.int(field);
        }
        w.sized(
            tag::BYTES,
            &[
                Opcode::LoadConst.into(),
                0,
                Opcode::StoreName.into(),
                0,
                Opcode::LoadConst.into(),
                1,
                Opcode::ReturnValue.into(),
                0,
            ],
        );
        w.tuple_header(2).int(1).tag(tag::NONE);
        w.tuple_header(1).str("x");
        w.tuple_header(varnames.len() as i32);
        for name in varnames {
            w.str(name);
        }
        // a bare string where a tuple is expected is wrapped
        w.str("freevar");
        w.tuple_header(0);
        w.str("<string>").str("<module>").int(1);
        w.sized(tag::BYTES, &[]);
        w.0
    }

    #[test]
    fn decodes_module() {
        let file = parse_kyc_file(&module_bytes()).unwrap();
        assert_eq!(file.python_version, 9);
        assert_eq!(file.hash, -42);
        assert_eq!(file.comment, "test");
        let code = file.code;
        assert_eq!(code.name, "<module>");
        assert_eq!(code.flags, CodeFlags::NOFREE);
        assert_eq!(code.names, ["x"]);
        assert_eq!(code.freevars, ["freevar"]);
        assert_eq!(
            code.constants,
            [ConstantData::Integer { value: 1 }, ConstantData::None]
        );
        assert_eq!(code.instruction_count(), 4);
    }

    #[test]
    fn parameters_must_fit_in_the_local_names() {
        // def f(a, b) with only `a` among its locals
        let err = parse_kyc_file(&code_bytes([2, 0, 0, 1, 1, 0x43], &["a"])).unwrap_err();
        assert_eq!(
            err,
            KycError::BadParameterCount {
                name: "<module>".to_owned(),
                params: 2,
                varnames: 1,
            }
        );
        // *args and **kwargs each take a slot of their own
        let flags = (CodeFlags::OPTIMIZED | CodeFlags::VARARGS | CodeFlags::VARKEYWORDS).bits();
        assert!(matches!(
            parse_kyc_file(&code_bytes([1, 0, 0, 2, 1, flags as i32], &["a", "args"])),
            Err(KycError::BadParameterCount { params: 3, .. })
        ));
        // more positional-only parameters than positional ones
        assert!(matches!(
            parse_kyc_file(&code_bytes([1, 2, 0, 2, 1, 0x43], &["a", "b"])),
            Err(KycError::BadParameterCount { .. })
        ));

        let file = parse_kyc_file(&code_bytes([1, 0, 1, 2, 1, 0x43], &["a", "b"])).unwrap();
        let args = file.code.arg_names();
        assert_eq!(args.args, ["a"]);
        assert_eq!(args.kwonlyargs, ["b"]);
    }

    #[test]
    fn rejects_bad_headers() {
        assert_eq!(parse_kyc_file(b"PYC"), Err(KycError::BadMagic));
        assert_eq!(
            parse_kyc_file(b"KYCB\x09"),
            Err(KycError::UnsupportedVersion('B'))
        );
        assert_eq!(parse_kyc_file(b"KYCA\x09N"), Err(KycError::NotAFile));
        assert_eq!(
            parse_kyc_file(b"KY"),
            Err(KycError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn rejects_truncated_and_unknown() {
        let bytes = module_bytes();
        assert!(matches!(
            parse_kyc_file(&bytes[..bytes.len() - 3]),
            Err(KycError::Truncated { .. })
        ));

        let mut w = Writer::default();
        w.0.extend_from_slice(b"KYCA\x09K");
        w.tag(b'?');
        assert_eq!(
            parse_kyc_file(&w.0),
            Err(KycError::UnknownTag {
                tag: '?',
                offset: 6
            })
        );
    }

    #[test]
    fn code_field_kinds_are_checked() {
        let mut w = Writer::default();
        w.0.extend_from_slice(b"KYCA\x09K");
        w.long(0).str("").tag(tag::CODE).str("not an int");
        assert_eq!(
            parse_kyc_file(&w.0),
            Err(KycError::UnexpectedKind {
                field: "co_argcount",
                expected: "an int"
            })
        );
    }
}
