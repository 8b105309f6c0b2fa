// Common utils

// Single bit selection.
macro_rules! bit {
    ($bit_num:expr) => {
        bit!($bit_num, u8)
    };
    ($bit_num:expr, u8) => {
        (1 << $bit_num) as u8
    };
}

// Test a single bit.
macro_rules! test_bit {
    ($val:expr, $bit_num:expr) => {
        test_bit!($val, $bit_num, u8)
    };
    ($val:expr, $bit_num:expr, u8) => {
        ($val & bit!($bit_num, u8)) != 0
    };
}

// Make a 12-bit word from a nibble and a byte.
macro_rules! make12 {
    ($hi:expr, $lo:expr) => {
        ((($hi as u16) << 8) | ($lo as u16)) & 0xFFF
    };
}

// Get the high nibble of a byte.
macro_rules! hi_nibble {
    ($val:expr) => {
        (($val >> 4) & 0xF) as u8
    };
}

// Get the low nibble of a byte.
macro_rules! lo_nibble {
    ($val:expr) => {
        ($val & 0xF) as u8
    };
}
