use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod command;

/// Implements `loom::stream::Command` for a `#[repr(C)]` tuple struct over `[u32; N]`.
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, Command)]
/// #[command(opcode = 0x1100_0000, mask = 0xff80_0000)]
/// #[repr(C)]
/// pub struct MiLoadRegisterImm(pub [u32; 3]);
/// ```
///
/// Supported keys are `crate`, `opcode`, `mask` and `length`. When `length` is true (the default)
/// the header carries the dword count minus two in its low bits.
#[proc_macro_derive(Command, attributes(command))]
pub fn derive_command(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let expanded = match command::derive_command(input) {
        Ok(expanded) => expanded,
        Err(err) => err.to_compile_error(),
    };
    expanded.into()
}
