pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
/// Bad arguments, configuration or input file
pub const INPUT_ERROR: i32 = 2;
/// The line source could not be opened
pub const SOURCE_ERROR: i32 = 3;
