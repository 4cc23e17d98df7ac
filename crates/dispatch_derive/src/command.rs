use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    DeriveInput, Expr, ExprLit, Fields, Lit, LitBool, LitInt, LitStr, Path, Type, TypeArray,
    spanned::Spanned,
};

pub fn derive_command(input: DeriveInput) -> syn::Result<TokenStream> {
    // commands are plain dword arrays wrapped in a single-field tuple struct
    let fields = match &input.data {
        syn::Data::Struct(data_struct) => &data_struct.fields,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "`Command` can only be derived for structs",
            ));
        }
    };
    let dwords = match fields {
        Fields::Unnamed(fields) if fields.unnamed.len() == 1 => {
            dword_count(&fields.unnamed[0].ty)?
        }
        _ => {
            return Err(syn::Error::new(
                fields.span(),
                "`Command` requires a tuple struct with exactly one `[u32; N]` field",
            ));
        }
    };

    let mut crate_name = None;
    let mut opcode = None;
    let mut mask = None;
    let mut length = true;
    for attr in &input.attrs {
        if !attr.path().is_ident("command") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                let s: LitStr = meta.value()?.parse()?;
                crate_name = Some(s.parse::<Path>()?);
                Ok(())
            } else if meta.path.is_ident("opcode") {
                let value: LitInt = meta.value()?.parse()?;
                opcode = Some(value.base10_parse::<u32>()?);
                Ok(())
            } else if meta.path.is_ident("mask") {
                let value: LitInt = meta.value()?.parse()?;
                mask = Some(value.base10_parse::<u32>()?);
                Ok(())
            } else if meta.path.is_ident("length") {
                let value: LitBool = meta.value()?.parse()?;
                length = value.value;
                Ok(())
            } else {
                Err(meta.error(
                    "unexpected attribute; supported are `crate`, `opcode`, `mask` and `length`",
                ))
            }
        })?;
    }

    let Some(opcode) = opcode else {
        return Err(syn::Error::new(
            input.span(),
            "missing `#[command(opcode = ...)]`",
        ));
    };
    let mask = mask.unwrap_or(0xffff_0000);
    if opcode & !mask != 0 {
        return Err(syn::Error::new(
            input.span(),
            format!("opcode {opcode:#010x} has bits outside of mask {mask:#010x}"),
        ));
    }

    let header = match length {
        true if dwords < 2 => {
            return Err(syn::Error::new(
                input.span(),
                "single-dword commands must set `length = false`",
            ));
        }
        true => opcode | (dwords - 2),
        false => opcode,
    };

    let base_path = match crate_name {
        Some(path) => quote!(#path::loom::stream),
        None => quote!(::kernel_dispatch::loom::stream),
    };

    let name = &input.ident;
    let name_str = name.to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #base_path::Command for #name #ty_generics #where_clause {
            const NAME: &'static str = #name_str;
            const OPCODE: u32 = #opcode;
            const OPCODE_MASK: u32 = #mask;

            #[inline]
            fn init() -> Self {
                let mut cmd: Self = ::bytemuck::Zeroable::zeroed();
                cmd.0[0] = #header;
                cmd
            }
        }
    })
}

/// Extracts `N` from a `[u32; N]` field type.
fn dword_count(ty: &Type) -> syn::Result<u32> {
    let error = || syn::Error::new(ty.span(), "expected a `[u32; N]` field with a literal length");
    let Type::Array(TypeArray { elem, len, .. }) = ty else {
        return Err(error());
    };
    match elem.as_ref() {
        Type::Path(path) if path.path.is_ident("u32") => {}
        _ => return Err(error()),
    }
    match len {
        Expr::Lit(ExprLit {
            lit: Lit::Int(len), ..
        }) => len.base10_parse::<u32>(),
        _ => Err(error()),
    }
}
