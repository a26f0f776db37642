//! Minimal static ELF64 container for the linked image: one header, two
//! PT_LOAD segments (code and read-only data), no sections.

use crate::link::Executable;

const EHDR_SIZE: u16 = 64;
const PHDR_SIZE: u16 = 56;
const PAGE: u64 = 0x1000;

const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

struct Segment {
    flags: u32,
    file_offset: u64,
    address: u64,
    size: u64,
}

fn program_header(out: &mut Vec<u8>, segment: &Segment) {
    out.extend_from_slice(&PT_LOAD.to_le_bytes());
    out.extend_from_slice(&segment.flags.to_le_bytes());
    out.extend_from_slice(&segment.file_offset.to_le_bytes());
    out.extend_from_slice(&segment.address.to_le_bytes());
    // Physical address mirrors the virtual one.
    out.extend_from_slice(&segment.address.to_le_bytes());
    out.extend_from_slice(&segment.size.to_le_bytes());
    out.extend_from_slice(&segment.size.to_le_bytes());
    out.extend_from_slice(&PAGE.to_le_bytes());
}

/// Serializes the image as a runnable ELF file.
pub fn write_executable(executable: &Executable) -> Vec<u8> {
    let code_offset = PAGE;
    let rodata_offset = code_offset + align_up(executable.code.len() as u64, PAGE);

    let mut out = Vec::with_capacity(rodata_offset as usize + executable.rodata.len());

    // e_ident
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
    out.push(2); // 64-bit
    out.push(1); // little endian
    out.push(1); // ELF version
    out.push(0); // System V ABI
    out.extend_from_slice(&[0; 8]);

    out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out.extend_from_slice(&0x3Eu16.to_le_bytes()); // EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes()); // EV_CURRENT
    out.extend_from_slice(&executable.entry.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u64).to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&EHDR_SIZE.to_le_bytes());
    out.extend_from_slice(&PHDR_SIZE.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

    program_header(
        &mut out,
        &Segment {
            flags: PF_R | PF_X,
            file_offset: code_offset,
            address: executable.code_address,
            size: executable.code.len() as u64,
        },
    );
    program_header(
        &mut out,
        &Segment {
            flags: PF_R,
            file_offset: rodata_offset,
            address: executable.rodata_address,
            size: executable.rodata.len() as u64,
        },
    );

    out.resize(code_offset as usize, 0);
    out.extend_from_slice(&executable.code);
    out.resize(rodata_offset as usize, 0);
    out.extend_from_slice(&executable.rodata);

    out
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::IMAGE_BASE;
    use pretty_assertions::assert_eq;

    fn executable() -> Executable {
        Executable {
            code: vec![0x0F, 0x05],
            rodata: b"Hello\n".to_vec(),
            code_address: IMAGE_BASE + PAGE,
            rodata_address: IMAGE_BASE + 2 * PAGE,
            entry: IMAGE_BASE + PAGE,
        }
    }

    #[test]
    fn header_magic_and_entry() {
        let bytes = write_executable(&executable());

        assert_eq!(&bytes[..4], &[0x7F, b'E', b'L', b'F']);
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[5], 1);
        assert_eq!(
            bytes[24..32],
            (IMAGE_BASE + PAGE).to_le_bytes(),
            "entry point"
        );
    }

    #[test]
    fn segments_sit_on_page_boundaries() {
        let bytes = write_executable(&executable());

        // Code bytes at file offset 0x1000.
        assert_eq!(&bytes[0x1000..0x1002], &[0x0F, 0x05]);
        // Read-only data on the following page.
        assert_eq!(&bytes[0x2000..0x2006], b"Hello\n");
    }

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_up(0, PAGE), 0);
        assert_eq!(align_up(1, PAGE), PAGE);
        assert_eq!(align_up(PAGE, PAGE), PAGE);
    }
}
