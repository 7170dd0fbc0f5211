/// Suffix appended to a data file's name to form its checksum sidecar.
pub const MD5_SUFFIX: &str = ".md5";

/// Separator between the hash and the filename in a sidecar line (text mode, as `md5sum` writes).
pub const SIDECAR_SEPARATOR: &str = "  ";
