// Copyright (C) 2024 Ethan Uppal. All rights reserved.

use std::{io, mem, ptr, slice};

use log::{debug, warn};

use crate::error::{JitError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Protection {
    ReadWrite,
    ReadExecute,
    ReadWriteExecute,
}

impl Protection {
    fn flags(self) -> libc::c_int {
        match self {
            Self::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Self::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
            Self::ReadWriteExecute => {
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC
            }
        }
    }
}

#[cfg(target_os = "macos")]
const MAP_FLAGS: libc::c_int =
    libc::MAP_JIT | libc::MAP_ANON | libc::MAP_PRIVATE;
#[cfg(not(target_os = "macos"))]
const MAP_FLAGS: libc::c_int = libc::MAP_ANON | libc::MAP_PRIVATE;

/// A page-aligned anonymous mapping for generated code, unmapped on drop.
///
/// Regions from [`ExecutableMemory::of_size`] are never writable and
/// executable at the same time: they start read/write and
/// [`ExecutableMemory::make_executable`] seals them read/execute.
#[derive(Debug)]
pub struct ExecutableMemory {
    start: *mut u8,
    length: usize,
    protection: Protection,
}

impl ExecutableMemory {
    /// Maps at least `length` bytes, read/write.
    pub fn of_size(length: usize) -> Result<ExecutableMemory> {
        Self::map(length, Protection::ReadWrite)
    }

    /// Maps at least `length` bytes, read/write/execute at once.
    pub fn of_size_rwx(length: usize) -> Result<ExecutableMemory> {
        Self::map(length, Protection::ReadWriteExecute)
    }

    /// Maps just enough pages for `code`, copies it in and seals the
    /// region read/execute.
    pub fn from_code(code: &[u8]) -> Result<ExecutableMemory> {
        let mut memory = Self::of_size(code.len())?;
        memory.write(0, code)?;
        memory.make_executable()?;
        Ok(memory)
    }

    fn map(length: usize, protection: Protection) -> Result<ExecutableMemory> {
        if length == 0 {
            return Err(JitError::Empty);
        }
        let page_size = page_size().map_err(|source| JitError::Map {
            length,
            source,
        })?;
        let aligned_length = length
            .checked_add(page_size - 1)
            .map(|padded| padded & !(page_size - 1))
            .ok_or_else(|| JitError::Map {
                length,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "length does not round up to a whole number of pages",
                ),
            })?;

        let start = unsafe {
            libc::mmap(
                ptr::null_mut(),
                aligned_length,
                protection.flags(),
                MAP_FLAGS,
                -1,
                0,
            )
        };
        if start == libc::MAP_FAILED {
            return Err(JitError::Map {
                length: aligned_length,
                source: io::Error::last_os_error(),
            });
        }
        debug!(
            "mapped {} bytes at {:p} as {:?}",
            aligned_length, start, protection
        );

        Ok(ExecutableMemory {
            start: start as *mut u8,
            length: aligned_length,
            protection,
        })
    }

    pub fn start(&self) -> *const u8 {
        self.start
    }

    /// The mapped length, a whole number of pages.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_writable(&self) -> bool {
        self.protection != Protection::ReadExecute
    }

    pub fn is_executable(&self) -> bool {
        self.protection != Protection::ReadWrite
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.start, self.length) }
    }

    /// Copies `bytes` to `offset` within the region.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        if !self.is_writable() {
            return Err(JitError::NotWritable);
        }
        let end = offset.checked_add(bytes.len());
        if end.map_or(true, |end| end > self.length) {
            return Err(JitError::OutOfBounds {
                offset,
                len: bytes.len(),
                capacity: self.length,
            });
        }
        unsafe {
            slice::from_raw_parts_mut(self.start, self.length)
                [offset..offset + bytes.len()]
                .copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Seals the region read/execute.
    pub fn make_executable(&mut self) -> Result<()> {
        self.protect(Protection::ReadExecute)?;
        self.invalidate_icache();
        Ok(())
    }

    /// Reopens the region read/write; it stops being executable.
    pub fn make_writable(&mut self) -> Result<()> {
        self.protect(Protection::ReadWrite)
    }

    /// Reinterprets the start of the region as a function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type whose ABI and signature match
    /// the code written at the start of the region, and that code must be
    /// safe to run with whatever arguments the caller passes.
    pub unsafe fn as_fn<F: Copy>(&self) -> Result<F> {
        if !self.is_executable() {
            return Err(JitError::NotExecutable);
        }
        debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut u8>());
        Ok(mem::transmute_copy::<*mut u8, F>(&self.start))
    }

    fn protect(&mut self, protection: Protection) -> Result<()> {
        let result = unsafe {
            libc::mprotect(
                self.start as *mut libc::c_void,
                self.length,
                protection.flags(),
            )
        };
        if result == -1 {
            return Err(JitError::Protect(io::Error::last_os_error()));
        }
        self.protection = protection;
        Ok(())
    }

    #[cfg(target_arch = "aarch64")]
    fn invalidate_icache(&self) {
        use std::arch::asm;

        const CACHE_LINE_SIZE: usize = 64;
        let start = self.start as usize & !(CACHE_LINE_SIZE - 1);
        let end = self.start as usize + self.length;
        unsafe {
            for address in (start..end).step_by(CACHE_LINE_SIZE) {
                asm!("dc cvau, {0}", in(reg) address, options(nostack));
                asm!("ic ivau, {0}", in(reg) address, options(nostack));
            }
            asm!("dsb ish", options(nostack));
            asm!("isb", options(nostack));
        }
    }

    // x86-64 keeps instruction fetch coherent with stores.
    #[cfg(not(target_arch = "aarch64"))]
    fn invalidate_icache(&self) {}
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        let result =
            unsafe { libc::munmap(self.start as *mut libc::c_void, self.length) };
        if result == -1 {
            warn!(
                "could not unmap {} bytes at {:p}: {}",
                self.length,
                self.start,
                io::Error::last_os_error()
            );
        }
    }
}

fn page_size() -> io::Result<usize> {
    let result = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result as usize)
    }
}
