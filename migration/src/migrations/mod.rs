pub mod m202608010001_create_users;
pub mod m202608010002_create_courses;
pub mod m202608010003_create_classroom_locations;
pub mod m202608010004_create_attendance_sessions;
pub mod m202608010005_create_student_devices;
pub mod m202608010006_create_attendance_records;
pub mod m202608010007_create_proxy_attempts;
