use crate::error::TrainingResult;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::path::Path;

/// Serializes `value` with four-space indentation, the layout the external
/// toolchain's own configs use.
pub(crate) fn to_pretty_string<T: Serialize + ?Sized>(value: &T) -> TrainingResult<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Writes `value` to `path`, creating parent directories and replacing any
/// previous file.
pub(crate) fn write_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_pretty_string(value)?)?;
    Ok(())
}
