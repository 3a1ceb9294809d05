use std::ops::Range;
use std::path::Path;

use goblin::container::Ctx;
use goblin::elf::header::ET_DYN;
use goblin::elf::note::NT_GNU_BUILD_ID;
use goblin::elf::program_header::{PF_X, PT_LOAD, PT_NOTE};
use goblin::elf::{Elf, Header, ProgramHeader};
use sonda_process::BuildId;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Size of the first read of an ELF file, which usually covers its header,
/// program headers and notes.
const PREFIX_SIZE: u64 = 16 * 1024;

/// Executable `PT_LOAD` segment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoadSegment {
    /// File range of the segment.
    file_range: Range<u64>,

    /// Virtual address of the segment.
    vaddr: u64,
}

/// Information needed to normalize the addresses of a mapped ELF file.
#[derive(Debug, Clone)]
pub(crate) struct ElfFile {
    build_id: Option<BuildId>,
    is_dyn: bool,
    exec_segments: Vec<LoadSegment>,
}

impl ElfFile {
    /// Reads and parses the ELF file at the given path.
    ///
    /// Only the beginning of the file is read, up to the end of its program
    /// headers and note segments.
    pub async fn open(path: &Path) -> crate::Result<Self> {
        let file_error = |e| crate::Error::File(path.to_path_buf(), e);

        let mut file = File::open(path).await.map_err(file_error)?;
        let mut data = Vec::new();

        read_up_to(&mut file, &mut data, PREFIX_SIZE)
            .await
            .map_err(file_error)?;

        let header = Elf::parse_header(&data)?;
        let phdrs_end = header
            .e_phoff
            .saturating_add(u64::from(header.e_phnum) * u64::from(header.e_phentsize));

        read_up_to(&mut file, &mut data, phdrs_end)
            .await
            .map_err(file_error)?;

        let phdrs = program_headers(&header, &data)?;

        let notes_end = phdrs
            .iter()
            .filter(|phdr| phdr.p_type == PT_NOTE)
            .map(|phdr| phdr.p_offset.saturating_add(phdr.p_filesz))
            .max()
            .unwrap_or_default();

        read_up_to(&mut file, &mut data, notes_end)
            .await
            .map_err(file_error)?;

        Self::from_parts(header, phdrs, &data)
    }

    /// Parses an ELF file.
    pub fn parse(data: &[u8]) -> crate::Result<Self> {
        let header = Elf::parse_header(data)?;
        let phdrs = program_headers(&header, data)?;

        Self::from_parts(header, phdrs, data)
    }

    fn from_parts(header: Header, phdrs: Vec<ProgramHeader>, data: &[u8]) -> crate::Result<Self> {
        let mut elf = Elf::lazy_parse(header)?;
        elf.program_headers = phdrs;

        let exec_segments = elf
            .program_headers
            .iter()
            .filter(|phdr| phdr.p_type == PT_LOAD && phdr.p_flags & PF_X != 0)
            .map(|phdr| LoadSegment {
                file_range: phdr.p_offset..phdr.p_offset.saturating_add(phdr.p_filesz),
                vaddr: phdr.p_vaddr,
            })
            .collect();

        Ok(Self {
            build_id: gnu_build_id(&elf, data),
            is_dyn: elf.header.e_type == ET_DYN,
            exec_segments,
        })
    }

    /// Returns the GNU build ID of the ELF file.
    pub fn build_id(&self) -> Option<&BuildId> {
        self.build_id.as_ref()
    }

    /// Returns the normalization base of a mapping of this ELF file.
    ///
    /// Normalized addresses are virtual addresses of the ELF file, so that
    /// they can be symbolized with its symbol table.
    pub fn base(&self, addr_range: &Range<u64>, offset: u64) -> u64 {
        if !self.is_dyn {
            return 0;
        }

        let default_base = addr_range.start.wrapping_sub(offset);

        self.exec_segments
            .iter()
            .find(|segment| segment.file_range.contains(&offset))
            .map_or(default_base, |segment| {
                default_base
                    .wrapping_add(segment.file_range.start)
                    .wrapping_sub(segment.vaddr)
            })
    }
}

fn program_headers(header: &Header, data: &[u8]) -> crate::Result<Vec<ProgramHeader>> {
    let ctx = Ctx::new(header.container()?, header.endianness()?);

    let phdrs = ProgramHeader::parse(
        data,
        header.e_phoff as usize,
        header.e_phnum as usize,
        ctx,
    )?;

    Ok(phdrs)
}

fn gnu_build_id<'a>(elf: &Elf<'a>, data: &'a [u8]) -> Option<BuildId> {
    elf.iter_note_headers(data)?
        .filter_map(Result::ok)
        .find(|note| note.n_type == NT_GNU_BUILD_ID && note.name == "GNU" && !note.desc.is_empty())
        .map(|note| BuildId::from_bytes(note.desc))
}

/// Reads the file sequentially until `data` holds its first `len` bytes (or
/// the whole file, if shorter).
async fn read_up_to(file: &mut File, data: &mut Vec<u8>, len: u64) -> std::io::Result<()> {
    let missing = len.saturating_sub(data.len() as u64);

    if missing > 0 {
        (&mut *file).take(missing).read_to_end(data).await?;
    }

    Ok(())
}
