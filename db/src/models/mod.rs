pub mod user;
pub mod course;
pub mod classroom_location;
pub mod attendance_session;
pub mod attendance_record;
pub mod student_device;
pub mod proxy_attempt;

pub use user::Entity as User;
pub use course::Entity as Course;
pub use classroom_location::Entity as ClassroomLocation;
pub use attendance_session::Entity as AttendanceSession;
pub use attendance_record::Entity as AttendanceRecord;
pub use student_device::Entity as StudentDevice;
pub use proxy_attempt::Entity as ProxyAttempt;
