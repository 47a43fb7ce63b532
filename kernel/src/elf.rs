//! ELF64 program loading
//!
//! A straight translator from an in-memory executable image to mapped user
//! memory: validate the header, then reserve frames and map every LOAD
//! segment writable, user-accessible, and executable, zeroing `memsz` and
//! copying `filesz`.

use crate::error::{Errno, SysResult};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const CLASS_ELF64: u8 = 2;
const MACHINE_AARCH64: u16 = 183;

/// Program-header segment types the loader distinguishes.
pub const PT_LOAD: u32 = 1;

/// The fields of an ELF64 program header the loader consumes.
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

/// A validated view over an executable image.
pub struct ElfImage<'a> {
    data: &'a [u8],
    entry: u64,
    phoff: u64,
    phentsize: u16,
    phnum: u16,
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap_or([0; 4]))
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap_or([0; 8]))
}

impl<'a> ElfImage<'a> {
    /// Validate the file header: ELF64, AArch64, at least one program
    /// header.
    pub fn parse(data: &'a [u8]) -> SysResult<Self> {
        if data.len() < 64 || data[0..4] != ELF_MAGIC {
            return Err(Errno::Inval);
        }
        if data[4] != CLASS_ELF64 || read_u16(data, 18) != MACHINE_AARCH64 {
            return Err(Errno::Inval);
        }
        let image = Self {
            data,
            entry: read_u64(data, 24),
            phoff: read_u64(data, 32),
            phentsize: read_u16(data, 54),
            phnum: read_u16(data, 56),
        };
        if image.phnum == 0 {
            return Err(Errno::Inval);
        }
        Ok(image)
    }

    /// Program entry point.
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// Iterate the program headers.
    pub fn program_headers(&self) -> impl Iterator<Item = ProgramHeader> + '_ {
        (0..self.phnum as usize).filter_map(move |i| {
            let base = self.phoff as usize + i * self.phentsize as usize;
            if base + 56 > self.data.len() {
                return None;
            }
            Some(ProgramHeader {
                p_type: read_u32(self.data, base),
                offset: read_u64(self.data, base + 8),
                vaddr: read_u64(self.data, base + 16),
                filesz: read_u64(self.data, base + 32),
                memsz: read_u64(self.data, base + 40),
            })
        })
    }
}

/// Map every LOAD segment of `image` into the current address space and
/// return the entry point.
pub fn build_program_image(data: &[u8]) -> SysResult<u64> {
    let image = ElfImage::parse(data)?;
    for header in image.program_headers() {
        if header.p_type != PT_LOAD {
            continue;
        }
        load_segment(data, &header)?;
    }
    Ok(image.entry())
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
fn load_segment(data: &[u8], header: &ProgramHeader) -> SysResult<()> {
    use crate::mm::page_table::{get_page_frame, map_region};
    use crate::mm::{PageFlags, PhysAddr, VirtAddr, FRAME_ALLOCATOR, PAGE_SIZE};

    let memsz = header.memsz as usize;
    let frame: PhysAddr = FRAME_ALLOCATOR.lock().reserve(memsz)?;

    // Align the mapping to page granularity around the segment base; if
    // the first page is already backed (a previous segment straddled it),
    // start the new mapping at the next page boundary.
    let vaddr = header.vaddr;
    let diff = vaddr as usize % PAGE_SIZE;
    let first_mapped = !get_page_frame(VirtAddr::new(vaddr)).is_null();
    let (map_base, map_size) = if first_mapped {
        (
            vaddr + (PAGE_SIZE - diff) as u64,
            memsz.saturating_sub(PAGE_SIZE - diff),
        )
    } else {
        (vaddr - diff as u64, memsz + diff)
    };
    let map_size = map_size.next_multiple_of(PAGE_SIZE);
    map_region(
        VirtAddr::new(map_base),
        map_size,
        frame,
        PageFlags::RW | PageFlags::USER | PageFlags::EXE,
    )?;

    let filesz = header.filesz as usize;
    let src = data
        .get(header.offset as usize..header.offset as usize + filesz)
        .ok_or(Errno::Inval)?;
    // SAFETY: the segment's pages were just mapped writable.
    unsafe {
        core::ptr::write_bytes(vaddr as *mut u8, 0, memsz);
        core::ptr::copy_nonoverlapping(src.as_ptr(), vaddr as *mut u8, filesz);
    }
    Ok(())
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
fn load_segment(_data: &[u8], _header: &ProgramHeader) -> SysResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Assemble a minimal ELF64 AArch64 executable with one LOAD segment.
    fn minimal_elf(entry: u64) -> Vec<u8> {
        let mut elf = vec![0u8; 64 + 56 + 16];
        elf[0..4].copy_from_slice(&ELF_MAGIC);
        elf[4] = CLASS_ELF64;
        elf[5] = 1; // little endian
        elf[18..20].copy_from_slice(&MACHINE_AARCH64.to_le_bytes());
        elf[24..32].copy_from_slice(&entry.to_le_bytes());
        elf[32..40].copy_from_slice(&64u64.to_le_bytes()); // phoff
        elf[54..56].copy_from_slice(&56u16.to_le_bytes()); // phentsize
        elf[56..58].copy_from_slice(&1u16.to_le_bytes()); // phnum

        let ph = 64;
        elf[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
        elf[ph + 8..ph + 16].copy_from_slice(&120u64.to_le_bytes()); // offset
        elf[ph + 16..ph + 24].copy_from_slice(&0x40_0000u64.to_le_bytes()); // vaddr
        elf[ph + 32..ph + 40].copy_from_slice(&16u64.to_le_bytes()); // filesz
        elf[ph + 40..ph + 48].copy_from_slice(&32u64.to_le_bytes()); // memsz
        elf
    }

    #[test]
    fn parses_entry_and_headers() {
        let elf = minimal_elf(0x40_0100);
        let image = ElfImage::parse(&elf).unwrap();
        assert_eq!(image.entry(), 0x40_0100);

        let headers: Vec<ProgramHeader> = image.program_headers().collect();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].p_type, PT_LOAD);
        assert_eq!(headers[0].vaddr, 0x40_0000);
        assert_eq!(headers[0].filesz, 16);
        assert_eq!(headers[0].memsz, 32);
    }

    #[test]
    fn rejects_foreign_binaries() {
        let mut elf = minimal_elf(0x40_0100);
        elf[18] = 62; // x86_64
        assert_eq!(ElfImage::parse(&elf).err(), Some(Errno::Inval));

        let mut elf = minimal_elf(0x40_0100);
        elf[4] = 1; // ELF32
        assert_eq!(ElfImage::parse(&elf).err(), Some(Errno::Inval));

        let mut elf = minimal_elf(0x40_0100);
        elf[0] = 0;
        assert_eq!(ElfImage::parse(&elf).err(), Some(Errno::Inval));

        assert!(ElfImage::parse(&[0u8; 8]).is_err());
    }

    #[test]
    fn rejects_headerless_images() {
        let mut elf = minimal_elf(0x40_0100);
        elf[56..58].copy_from_slice(&0u16.to_le_bytes());
        assert_eq!(ElfImage::parse(&elf).err(), Some(Errno::Inval));
    }
}
