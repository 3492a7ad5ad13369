// Cache entry flags, as defined in glibc sysdeps/generic/ldconfig.h.  The
// low byte encodes the libc ABI the object was linked against, the high
// byte the required architecture variant.

use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const FLAG_ANY: i32 = -1;
pub const FLAG_TYPE_MASK: i32 = 0x00ff;
pub const FLAG_LIBC4: i32 = 0x0000;
pub const FLAG_ELF: i32 = 0x0001;
pub const FLAG_ELF_LIBC5: i32 = 0x0002;
pub const FLAG_ELF_LIBC6: i32 = 0x0003;
pub const FLAG_REQUIRED_MASK: i32 = 0xff00;
pub const FLAG_SPARC_LIB64: i32 = 0x0100;
pub const FLAG_IA64_LIB64: i32 = 0x0200;
pub const FLAG_X8664_LIB64: i32 = 0x0300;
pub const FLAG_S390_LIB64: i32 = 0x0400;
pub const FLAG_POWERPC_LIB64: i32 = 0x0500;
pub const FLAG_MIPS64_LIBN32: i32 = 0x0600;
pub const FLAG_MIPS64_LIBN64: i32 = 0x0700;
pub const FLAG_X8664_LIBX32: i32 = 0x0800;
pub const FLAG_ARM_LIBHF: i32 = 0x0900;
pub const FLAG_AARCH64_LIB64: i32 = 0x0a00;
pub const FLAG_ARM_LIBSF: i32 = 0x0b00;
pub const FLAG_MIPS_LIB32_NAN2008: i32 = 0x0c00;
pub const FLAG_MIPS64_LIBN32_NAN2008: i32 = 0x0d00;
pub const FLAG_MIPS64_LIBN64_NAN2008: i32 = 0x0e00;
pub const FLAG_RISCV_FLOAT_ABI_SOFT: i32 = 0x0f00;
pub const FLAG_RISCV_FLOAT_ABI_DOUBLE: i32 = 0x1000;

fn type_description(value: i32) -> Option<&'static str> {
    match value {
        FLAG_LIBC4 => Some("libc4"),
        FLAG_ELF => Some("ELF"),
        FLAG_ELF_LIBC5 => Some("libc5"),
        FLAG_ELF_LIBC6 => Some("libc6"),
        _ => None,
    }
}

fn required_description(value: i32) -> Option<&'static str> {
    match value {
        FLAG_SPARC_LIB64 => Some("64bit"),
        FLAG_IA64_LIB64 => Some("IA-64"),
        FLAG_X8664_LIB64 => Some("x86-64"),
        FLAG_S390_LIB64 => Some("64bit"),
        FLAG_POWERPC_LIB64 => Some("64bit"),
        FLAG_MIPS64_LIBN32 => Some("N32"),
        FLAG_MIPS64_LIBN64 => Some("64bit"),
        FLAG_X8664_LIBX32 => Some("x32"),
        FLAG_ARM_LIBHF => Some("hard-float"),
        FLAG_AARCH64_LIB64 => Some("AArch64"),
        FLAG_ARM_LIBSF => Some("soft-float"),
        FLAG_MIPS_LIB32_NAN2008 => Some("nan2008"),
        FLAG_MIPS64_LIBN32_NAN2008 => Some("N32,nan2008"),
        FLAG_MIPS64_LIBN64_NAN2008 => Some("64bit,nan2008"),
        FLAG_RISCV_FLOAT_ABI_SOFT => Some("soft-float"),
        FLAG_RISCV_FLOAT_ABI_DOUBLE => Some("double-float"),
        _ => None,
    }
}

/// Render a flags value the way `ldconfig -p` does, as `"<abi>,<arch>"`.
/// Unrecognized ABI bytes print as `unknown`, unrecognized architecture
/// bits as their raw integer value.
pub fn description(value: i32) -> String {
    let abi = type_description(value & FLAG_TYPE_MASK).unwrap_or("unknown");
    match required_description(value & FLAG_REQUIRED_MASK) {
        Some(required) => format!("{},{}", abi, required),
        None => format!("{},{}", abi, value & FLAG_REQUIRED_MASK),
    }
}

/// True for the architecture variants with a 64-bit ABI.
pub fn is_64bit(value: i32) -> bool {
    matches!(
        value & FLAG_REQUIRED_MASK,
        FLAG_SPARC_LIB64
            | FLAG_IA64_LIB64
            | FLAG_X8664_LIB64
            | FLAG_S390_LIB64
            | FLAG_POWERPC_LIB64
            | FLAG_MIPS64_LIBN64
            | FLAG_AARCH64_LIB64
            | FLAG_MIPS64_LIBN64_NAN2008
    )
}

/// Flags value a cache entry must carry to be loadable for the given
/// machine name and pointer width, from glibc
/// sysdeps/unix/sysv/linux/<ARCH>/dl-cache.h.
pub fn flags_for(machine: &str, bits: &str) -> Option<i32> {
    match (machine, bits) {
        ("x86_64", "64bit") => Some(FLAG_X8664_LIB64 | FLAG_ELF_LIBC6),
        ("x86_64", "32bit") => Some(FLAG_X8664_LIBX32 | FLAG_ELF_LIBC6),
        ("ppc64le", "64bit") => Some(FLAG_POWERPC_LIB64 | FLAG_ELF_LIBC6),
        ("arm", "32bit") => Some(FLAG_ARM_LIBHF | FLAG_ELF_LIBC6),
        ("aarch64", "64bit") => Some(FLAG_AARCH64_LIB64 | FLAG_ELF_LIBC6),
        ("aarch64_be", "64bit") => Some(FLAG_AARCH64_LIB64 | FLAG_ELF_LIBC6),
        _ => None,
    }
}

// The machine name the 'uname' system call would report for this process.
fn host_machine() -> &'static str {
    match (env::consts::ARCH, cfg!(target_endian = "little")) {
        ("aarch64", false) => "aarch64_be",
        ("powerpc64", true) => "ppc64le",
        (arch, _) => arch,
    }
}

// Pointer width of an ELF object, read from its identification bytes.
fn pointer_width(executable: &Path) -> Option<&'static str> {
    let mut ident = [0u8; 5];
    let mut file = File::open(executable).ok()?;
    file.read_exact(&mut ident).ok()?;

    if ident[..4] != *b"\x7fELF" {
        return None;
    }
    match ident[4] {
        1 => Some("32bit"),
        2 => Some("64bit"),
        _ => None,
    }
}

/// Flags value a cache entry must carry to be compatible with the running
/// machine, given an executable to take the pointer width from.  `None`
/// when no flag value is defined for the combination.
pub fn expected_flags(executable: &Path) -> Option<i32> {
    flags_for(host_machine(), pointer_width(executable)?)
}
