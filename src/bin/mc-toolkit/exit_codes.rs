pub const EXIT_OK: i32 = 0;
pub const EXIT_NO_DEVICE: i32 = 10;
pub const EXIT_INVALID_IMAGE: i32 = 11;
pub const EXIT_WRITE_FAILED: i32 = 12;
pub const EXIT_AMBIGUOUS: i32 = 13;
pub const EXIT_UNKNOWN_CHIP: i32 = 14;
pub const EXIT_NO_LOADER: i32 = 15;
pub const EXIT_CANCELLED: i32 = 16;
pub const EXIT_INVALID_INPUT: i32 = 17;
pub const EXIT_UNEXPECTED: i32 = 20;
