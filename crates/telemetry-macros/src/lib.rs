// SPDX-License-Identifier: Apache-2.0

//! `#[metric_set]`: derives the metric-set plumbing for phoenix-telemetry.
//!
//! ```ignore
//! #[metric_set(name = "phoenix.topk")]
//! #[derive(Debug, Default, Clone)]
//! pub struct TopKMetrics {
//!     /// Resources kept by the filter.
//!     #[metric(unit = "{resource}")]
//!     pub resources_included: Counter<u64>,
//!
//!     /// Fraction of input resources kept.
//!     #[metric(unit = "{1}")]
//!     pub coverage: Gauge<f64>,
//! }
//! ```
//!
//! The macro strips the `#[metric(...)]` field attributes, emits the struct
//! unchanged otherwise, and implements
//! `phoenix_telemetry::metrics::MetricSetHandler` with a static descriptor
//! built from field names, units, doc comments and instrument kinds
//! (`Counter<_>` fields become counters, `Gauge<_>` fields gauges).

use proc_macro::TokenStream;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Expr, ExprLit, Fields, ItemStruct, Lit, Meta, MetaNameValue, Token, Type, parse_macro_input};

/// See the crate-level documentation.
#[proc_macro_attribute]
pub fn metric_set(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item = parse_macro_input!(input as ItemStruct);

    let set_name = match parse_set_name(args) {
        Ok(name) => name,
        Err(err) => return err.to_compile_error().into(),
    };

    let fields = match &mut item.fields {
        Fields::Named(named) => named,
        _ => {
            return syn::Error::new_spanned(&item, "#[metric_set] requires named fields")
                .to_compile_error()
                .into();
        }
    };

    let mut descriptor_entries = Vec::new();
    let mut value_exprs = Vec::new();
    let mut reset_stmts = Vec::new();

    for field in &mut fields.named {
        let ident = match &field.ident {
            Some(ident) => ident.clone(),
            None => continue,
        };
        let name_lit = ident.to_string();

        let unit = match take_metric_unit(field) {
            Ok(unit) => unit,
            Err(err) => return err.to_compile_error().into(),
        };
        let brief = doc_brief(&field.attrs);

        let instrument = match instrument_kind(&field.ty) {
            Some(kind) => kind,
            None => {
                return syn::Error::new_spanned(
                    &field.ty,
                    "metric fields must be Counter<_> or Gauge<_>",
                )
                .to_compile_error()
                .into();
            }
        };

        descriptor_entries.push(quote! {
            ::phoenix_telemetry::descriptor::MetricsField {
                name: #name_lit,
                unit: #unit,
                brief: #brief,
                instrument: #instrument,
            }
        });
        value_exprs.push(quote! {
            ::phoenix_telemetry::instrument::Instrumented::value(&self.#ident)
        });
        reset_stmts.push(quote! {
            ::phoenix_telemetry::instrument::Instrumented::reset(&mut self.#ident);
        });
    }

    let struct_ident = &item.ident;
    let expanded = quote! {
        #item

        impl ::phoenix_telemetry::metrics::MetricSetHandler for #struct_ident {
            fn descriptor(&self) -> &'static ::phoenix_telemetry::descriptor::MetricsDescriptor {
                static DESCRIPTOR: ::phoenix_telemetry::descriptor::MetricsDescriptor =
                    ::phoenix_telemetry::descriptor::MetricsDescriptor {
                        name: #set_name,
                        fields: &[#(#descriptor_entries),*],
                    };
                &DESCRIPTOR
            }

            fn snapshot_values(&self) -> ::std::vec::Vec<::phoenix_telemetry::descriptor::MetricValue> {
                ::std::vec![#(#value_exprs),*]
            }

            fn clear_values(&mut self) {
                #(#reset_stmts)*
            }
        }
    };
    expanded.into()
}

fn parse_set_name(args: TokenStream) -> Result<String, syn::Error> {
    let parsed = Punctuated::<MetaNameValue, Token![,]>::parse_terminated
        .parse2(args.into())
        .map_err(|err| syn::Error::new(err.span(), "expected #[metric_set(name = \"...\")]"))?;
    for nv in &parsed {
        if nv.path.is_ident("name") {
            if let Expr::Lit(ExprLit {
                lit: Lit::Str(lit), ..
            }) = &nv.value
            {
                return Ok(lit.value());
            }
        }
    }
    Err(syn::Error::new(
        proc_macro2::Span::call_site(),
        "missing `name = \"...\"` argument",
    ))
}

fn take_metric_unit(field: &mut syn::Field) -> Result<String, syn::Error> {
    let mut unit = "{1}".to_owned();
    let mut kept = Vec::new();
    for attr in field.attrs.drain(..) {
        if attr.path().is_ident("metric") {
            let nv: MetaNameValue = attr.parse_args()?;
            if nv.path.is_ident("unit") {
                if let Expr::Lit(ExprLit {
                    lit: Lit::Str(lit), ..
                }) = &nv.value
                {
                    unit = lit.value();
                    continue;
                }
            }
            return Err(syn::Error::new_spanned(
                &nv.path,
                "expected #[metric(unit = \"...\")]",
            ));
        }
        kept.push(attr);
    }
    field.attrs = kept;
    Ok(unit)
}

fn doc_brief(attrs: &[syn::Attribute]) -> String {
    for attr in attrs {
        if attr.path().is_ident("doc") {
            if let Meta::NameValue(MetaNameValue {
                value:
                    Expr::Lit(ExprLit {
                        lit: Lit::Str(lit), ..
                    }),
                ..
            }) = &attr.meta
            {
                return lit.value().trim().to_owned();
            }
        }
    }
    String::new()
}

fn instrument_kind(ty: &Type) -> Option<proc_macro2::TokenStream> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let last = type_path.path.segments.last()?;
    match last.ident.to_string().as_str() {
        "Counter" => Some(quote! { ::phoenix_telemetry::descriptor::Instrument::Counter }),
        "Gauge" => Some(quote! { ::phoenix_telemetry::descriptor::Instrument::Gauge }),
        _ => None,
    }
}
