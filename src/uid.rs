use uuid::Uuid;

/// Root for UIDs derived from a UUID (ISO/IEC 9834-8).
const UUID_ROOT: &str = "2.25";

/// A new globally unique DICOM UID.
pub fn mint_uid() -> String {
    format!("{UUID_ROOT}.{}", Uuid::new_v4().as_u128())
}
