pub const FG1_COLOR: (u8, u8, u8) = (0x6a, 0xcf, 0x86);
pub const FG2_COLOR: (u8, u8, u8) = (0xe2, 0xb8, 0x4c);

pub const FG1: owo_colors::Rgb = owo_colors::Rgb(FG1_COLOR.0, FG1_COLOR.1, FG1_COLOR.2);
pub const FG2: owo_colors::Rgb = owo_colors::Rgb(FG2_COLOR.0, FG2_COLOR.1, FG2_COLOR.2);
