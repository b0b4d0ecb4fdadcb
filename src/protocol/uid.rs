//! Well-known UIDs used by the association layer
//!
//! Only the handful of identifiers the engine itself needs. A full UID
//! dictionary is the business of a DICOM toolkit.

/// DICOM application context name
pub const APPLICATION_CONTEXT: &str = "1.2.840.10008.3.1.1.1";

/// Implicit VR Little Endian
pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
/// Explicit VR Little Endian
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
/// Explicit VR Big Endian (retired)
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

/// Verification SOP Class (C-ECHO)
pub const VERIFICATION: &str = "1.2.840.10008.1.1";

/// Patient Root Query/Retrieve - FIND
pub const PATIENT_ROOT_QR_FIND: &str = "1.2.840.10008.5.1.4.1.2.1.1";
/// Patient Root Query/Retrieve - MOVE
pub const PATIENT_ROOT_QR_MOVE: &str = "1.2.840.10008.5.1.4.1.2.1.2";
/// Patient Root Query/Retrieve - GET
pub const PATIENT_ROOT_QR_GET: &str = "1.2.840.10008.5.1.4.1.2.1.3";
/// Study Root Query/Retrieve - FIND
pub const STUDY_ROOT_QR_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
/// Study Root Query/Retrieve - MOVE
pub const STUDY_ROOT_QR_MOVE: &str = "1.2.840.10008.5.1.4.1.2.2.2";
/// Study Root Query/Retrieve - GET
pub const STUDY_ROOT_QR_GET: &str = "1.2.840.10008.5.1.4.1.2.2.3";

/// CT Image Storage
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
/// MR Image Storage
pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
/// Secondary Capture Image Storage
pub const SECONDARY_CAPTURE_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";

/// Implementation class UID advertised in user information
pub const IMPLEMENTATION_CLASS_UID: &str = "1.2.826.0.1.3680043.9.7133.1.1";
/// Implementation version name advertised in user information (max 16 chars)
pub const IMPLEMENTATION_VERSION_NAME: &str = "DICOMPOT_RS_01";

/// Abstract syntaxes a service user proposes when none are configured
pub fn default_abstract_syntaxes() -> Vec<String> {
    [
        VERIFICATION,
        PATIENT_ROOT_QR_FIND,
        PATIENT_ROOT_QR_MOVE,
        PATIENT_ROOT_QR_GET,
        STUDY_ROOT_QR_FIND,
        STUDY_ROOT_QR_MOVE,
        STUDY_ROOT_QR_GET,
        CT_IMAGE_STORAGE,
        MR_IMAGE_STORAGE,
        SECONDARY_CAPTURE_IMAGE_STORAGE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Transfer syntaxes a service user proposes when none are configured
pub fn default_transfer_syntaxes() -> Vec<String> {
    vec![
        EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
        IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
    ]
}
