//! Just enough ELF-64 section access to find the kernel's own `.debug_*`
//! sections inside the image Limine handed back in the kernel file
//! response. Nothing here loads or executes anything; it exists purely
//! to hand [`crate::dwarf`] byte slices.

use crate::error::{KernelError, Result};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    osabi: u8,
    abiversion: u8,
    pad: [u8; 7],
    elf_type: u16,
    machine: u16,
    version2: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64SectionHeader {
    name: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
}

/// A parsed view over an ELF-64 image's section headers; does not copy
/// the underlying bytes.
pub struct Image<'a> {
    data: &'a [u8],
    header: Elf64Header,
}

impl<'a> Image<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < core::mem::size_of::<Elf64Header>() {
            return Err(KernelError::OutOfBounds);
        }
        // SAFETY: `data` is at least `size_of::<Elf64Header>()` bytes,
        // and `Elf64Header` has no padding-sensitive invariants beyond
        // its raw fields, which are validated immediately below.
        let header = unsafe { core::ptr::read_unaligned(data.as_ptr() as *const Elf64Header) };
        if header.magic != ELF_MAGIC {
            return Err(KernelError::InvalidAddress);
        }
        if header.class != ELFCLASS64 || header.data != ELFDATA2LSB {
            return Err(KernelError::Unsupported);
        }
        Ok(Image { data, header })
    }

    fn section_header(&self, index: u16) -> Result<Elf64SectionHeader> {
        let off = self.header.shoff as usize + index as usize * self.header.shentsize as usize;
        let end = off
            .checked_add(core::mem::size_of::<Elf64SectionHeader>())
            .ok_or(KernelError::OutOfBounds)?;
        if end > self.data.len() {
            return Err(KernelError::OutOfBounds);
        }
        // SAFETY: bounds were just checked above; the header's
        // `shentsize`/`shoff` describe a contiguous array of records
        // of this exact repr(C) layout.
        let section = unsafe { core::ptr::read_unaligned(self.data[off..].as_ptr() as *const Elf64SectionHeader) };
        Ok(section)
    }

    fn section_name(&self, strtab: &Elf64SectionHeader, name_off: u32) -> Result<&'a str> {
        let start = strtab.offset as usize + name_off as usize;
        if start >= self.data.len() {
            return Err(KernelError::OutOfBounds);
        }
        let slice = &self.data[start..];
        let len = slice.iter().position(|&b| b == 0).ok_or(KernelError::OutOfBounds)?;
        core::str::from_utf8(&slice[..len]).map_err(|_| KernelError::InvalidAddress)
    }

    /// Returns the bytes of the section named `name`, or `None` if no
    /// such section exists. The common case for `.debug_*` lookups.
    pub fn section_by_name(&self, name: &str) -> Result<Option<&'a [u8]>> {
        if self.header.shstrndx == 0 && self.header.shnum == 0 {
            return Ok(None);
        }
        let strtab = self.section_header(self.header.shstrndx)?;
        for i in 0..self.header.shnum {
            let section = self.section_header(i)?;
            let section_name = self.section_name(&strtab, section.name)?;
            if section_name == name {
                let start = section.offset as usize;
                let end = start
                    .checked_add(section.size as usize)
                    .ok_or(KernelError::OutOfBounds)?;
                if end > self.data.len() {
                    return Err(KernelError::OutOfBounds);
                }
                return Ok(Some(&self.data[start..end]));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A growable-looking byte buffer backed by a fixed stack array, so
    /// these fixtures never touch the global allocator.
    struct Buf {
        data: [u8; 1024],
        len: usize,
    }

    impl Buf {
        fn new() -> Self {
            Buf { data: [0; 1024], len: 0 }
        }

        fn extend(&mut self, bytes: &[u8]) -> usize {
            let start = self.len;
            self.data[start..start + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
            start
        }

        fn push_struct<T>(&mut self, value: &T) {
            let size = core::mem::size_of::<T>();
            // SAFETY: writing a plain-old-data struct's bytes for a test
            // fixture; `value` is valid for `size` bytes.
            let bytes = unsafe { core::slice::from_raw_parts(value as *const T as *const u8, size) };
            self.extend(bytes);
        }

        fn as_slice(&self) -> &[u8] {
            &self.data[..self.len]
        }
    }

    /// Builds a minimal ELF-64 image with a `.shstrtab` and the given
    /// named sections, writing into the caller's fixed-size `Buf`.
    fn build_minimal_elf<'a>(out: &'a mut Buf, sections: &[(&str, &[u8])]) -> &'a [u8] {
        let mut shstrtab = Buf::new();
        shstrtab.extend(&[0]); // index 0 is the empty name
        let mut name_offsets = [0u32; 8];
        for (i, (name, _)) in sections.iter().enumerate() {
            name_offsets[i + 1] = shstrtab.len as u32;
            shstrtab.extend(name.as_bytes());
            shstrtab.extend(&[0]);
        }
        let shstrtab_name_off = shstrtab.len as u32;
        shstrtab.extend(b".shstrtab\0");

        let ehsize = core::mem::size_of::<Elf64Header>();
        let shentsize = core::mem::size_of::<Elf64SectionHeader>();
        let shnum = sections.len() + 2; // NULL + sections + .shstrtab

        let mut data_area = Buf::new();
        let mut section_offsets = [0usize; 8];
        for (i, (_, bytes)) in sections.iter().enumerate() {
            section_offsets[i] = data_area.extend(bytes);
        }
        let shstrtab_offset = data_area.extend(shstrtab.as_slice());

        let shoff = ehsize + data_area.len;

        let header = Elf64Header {
            magic: ELF_MAGIC,
            class: ELFCLASS64,
            data: ELFDATA2LSB,
            version: 1,
            osabi: 0,
            abiversion: 0,
            pad: [0; 7],
            elf_type: 1,
            machine: 0x3e,
            version2: 1,
            entry: 0,
            phoff: 0,
            shoff: shoff as u64,
            flags: 0,
            ehsize: ehsize as u16,
            phentsize: 0,
            phnum: 0,
            shentsize: shentsize as u16,
            shnum: shnum as u16,
            shstrndx: (shnum - 1) as u16,
        };

        out.push_struct(&header);
        out.extend(data_area.as_slice());

        let mut push_section = |out: &mut Buf, name: u32, offset: usize, size: usize| {
            let sh = Elf64SectionHeader {
                name,
                sh_type: 1,
                flags: 0,
                addr: 0,
                offset: (ehsize + offset) as u64,
                size: size as u64,
                link: 0,
                info: 0,
                addralign: 1,
                entsize: 0,
            };
            out.push_struct(&sh);
        };

        push_section(out, 0, 0, 0); // NULL section
        for (i, (_, bytes)) in sections.iter().enumerate() {
            push_section(out, name_offsets[i + 1], section_offsets[i], bytes.len());
        }
        push_section(out, shstrtab_name_off, shstrtab_offset, shstrtab.len);

        out.as_slice()
    }

    #[test]
    fn finds_section_by_name() {
        let mut buf = Buf::new();
        let data = build_minimal_elf(&mut buf, &[(".debug_info", b"abcd"), (".debug_line", b"xyz")]);
        let image = Image::parse(data).unwrap();
        assert_eq!(image.section_by_name(".debug_info").unwrap(), Some(&b"abcd"[..]));
        assert_eq!(image.section_by_name(".debug_line").unwrap(), Some(&b"xyz"[..]));
    }

    #[test]
    fn missing_section_returns_none() {
        let mut buf = Buf::new();
        let data = build_minimal_elf(&mut buf, &[(".debug_info", b"abcd")]);
        let image = Image::parse(data).unwrap();
        assert_eq!(image.section_by_name(".debug_abbrev").unwrap(), None);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = Buf::new();
        build_minimal_elf(&mut buf, &[(".debug_info", b"abcd")]);
        buf.data[0] = 0;
        assert!(Image::parse(buf.as_slice()).is_err());
    }
}
