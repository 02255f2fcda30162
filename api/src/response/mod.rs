use serde::Serialize;

/// Envelope for every JSON response the API sends.
///
/// ```json
/// {
///   "success": true,
///   "data": { "id": 1, "status": "active" },
///   "message": "Attendance session retrieved"
/// }
/// ```
///
/// `success` mirrors the HTTP status class so clients can branch without
/// inspecting codes; `message` carries the human-readable explanation and
/// `data` whatever payload the operation produced.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub success: bool,
    pub data: T,
    pub message: String,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: message.into(),
        }
    }

    /// Error envelope with `T::default()` as the payload, for failures that
    /// have nothing useful to return beyond the message.
    pub fn error(message: impl Into<String>) -> Self
    where
        T: Default,
    {
        Self {
            success: false,
            data: T::default(),
            message: message.into(),
        }
    }

    /// Error envelope that still carries a payload. Mark rejections use
    /// this to attach their machine-readable code.
    pub fn error_with(data: T, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data,
            message: message.into(),
        }
    }
}
