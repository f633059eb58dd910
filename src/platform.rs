use std::env::consts::{ARCH, OS};

/// Temurin release coordinates for each portable major version.
fn temurin_release(major: u32) -> Option<(&'static str, &'static str)> {
    match major {
        17 => Some(("jdk-17.0.12%2B7", "17.0.12_7")),
        21 => Some(("jdk-21.0.4%2B7", "21.0.4_7")),
        _ => None,
    }
}

/// (os, arch, extension) as they appear in Temurin asset names.
pub fn get_temurin_target() -> Result<(&'static str, &'static str, &'static str), String> {
    match (OS, ARCH) {
        ("windows", "x86_64") => Ok(("windows", "x64", "zip")),
        ("windows", "aarch64") => Ok(("windows", "aarch64", "zip")),
        ("linux", "x86_64") => Ok(("linux", "x64", "tar.gz")),
        ("linux", "aarch64") => Ok(("linux", "aarch64", "tar.gz")),
        ("macos", "x86_64") => Ok(("mac", "x64", "tar.gz")),
        ("macos", "aarch64") => Ok(("mac", "aarch64", "tar.gz")),
        _ => Err(format!("Unsupported platform: {OS} {ARCH}")),
    }
}

/// Download URL of a portable JDK for the current platform.
pub fn temurin_url(major: u32) -> Result<String, String> {
    let (tag, version) =
        temurin_release(major).ok_or_else(|| format!("No portable Java {major} build is known"))?;
    let (os, arch, ext) = get_temurin_target()?;
    Ok(format!(
        "https://github.com/adoptium/temurin{major}-binaries/releases/download/{tag}/OpenJDK{major}U-jdk_{arch}_{os}_hotspot_{version}.{ext}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn linux_x64_urls() {
        assert_eq!(
            temurin_url(17).unwrap(),
            "https://github.com/adoptium/temurin17-binaries/releases/download/jdk-17.0.12%2B7/OpenJDK17U-jdk_x64_linux_hotspot_17.0.12_7.tar.gz"
        );
        assert_eq!(
            temurin_url(21).unwrap(),
            "https://github.com/adoptium/temurin21-binaries/releases/download/jdk-21.0.4%2B7/OpenJDK21U-jdk_x64_linux_hotspot_21.0.4_7.tar.gz"
        );
    }

    #[test]
    fn unknown_major_is_rejected() {
        assert!(temurin_url(11).is_err());
    }
}
