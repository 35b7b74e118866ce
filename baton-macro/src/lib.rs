use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::punctuated::Punctuated;
use syn::{Expr, ExprLit, ItemFn, Lit, Meta, MetaNameValue, Token};

/// Declare a task handler, optionally with a recurring schedule.
///
/// The function must be `async fn(Option<String>) -> Result<bool, BoxError>`.
/// It is collected at link time and picked up by
/// `SchedulerBuilder::register_all()`.
///
/// # Examples
///
/// ```rust,ignore
/// use baton::{task, BoxError};
///
/// #[task(cron = "0 0 3 * * *", retry_timeout = "10m")]
/// async fn nightly_report(_data: Option<String>) -> Result<bool, BoxError> {
///     Ok(true)
/// }
///
/// // Only bound: executions arrive through `Scheduler::push`.
/// #[task(id = "send-mail")]
/// async fn send_mail(data: Option<String>) -> Result<bool, BoxError> {
///     Ok(data.is_some())
/// }
/// ```
///
/// # Parameters
///
/// - `id`: Task id (defaults to the function name)
/// - `cron`: Cron expression with a seconds field (e.g., "0 */5 * * * *")
/// - `retry`: Redeliver executions that are not acknowledged in time
/// - `retry_timeout`: Retry window such as "30s" or a number of milliseconds; implies `retry`
/// - `enabled`: Enable/disable the task (boolean or config placeholder)
///
/// String values may be `${key}` / `${key:default}` config placeholders.
#[proc_macro_attribute]
pub fn task(args: TokenStream, input: TokenStream) -> TokenStream {
    let attr_args = syn::parse_macro_input!(args with Punctuated::<Meta, Token![,]>::parse_terminated);
    let input_fn = syn::parse_macro_input!(input as ItemFn);

    match expand_task(&attr_args, &input_fn) {
        Ok(expanded) => expanded.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

struct TaskArgs {
    id: Option<String>,
    cron: String,
    retry: String,
    retry_timeout: String,
    enabled: String,
}

fn expand_task(
    attr_args: &Punctuated<Meta, Token![,]>,
    input_fn: &ItemFn,
) -> syn::Result<proc_macro2::TokenStream> {
    if input_fn.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            &input_fn.sig.fn_token,
            "#[task] can only be applied to async functions",
        ));
    }

    let fn_name = &input_fn.sig.ident;
    let args = parse_task_args(attr_args)?;

    let id = args.id.unwrap_or_else(|| fn_name.to_string());
    let cron = args.cron;
    let retry = args.retry;
    let retry_timeout = args.retry_timeout;
    let enabled = args.enabled;

    // Generate unique registration function name
    let register_fn_name = format_ident!("__register_task_{}", fn_name);

    Ok(quote! {
        #input_fn

        // Auto-registration using linkme
        #[::baton::baton_runtime::linkme::distributed_slice(::baton::baton_runtime::TASKS)]
        #[linkme(crate = ::baton::baton_runtime::linkme)]
        fn #register_fn_name() -> ::baton::baton_runtime::TaskDefinition {
            fn handler(
                data: ::core::option::Option<::std::string::String>,
            ) -> ::baton::baton_runtime::HandlerFuture<'static> {
                ::std::boxed::Box::pin(#fn_name(data))
            }

            ::baton::baton_runtime::TaskDefinition {
                id: #id,
                cron: #cron,
                retry: #retry,
                retry_timeout: #retry_timeout,
                enabled: #enabled,
                handler,
            }
        }
    })
}

fn parse_task_args(attr_args: &Punctuated<Meta, Token![,]>) -> syn::Result<TaskArgs> {
    let mut args = TaskArgs {
        id: None,
        cron: String::new(),
        retry: "false".to_string(),
        retry_timeout: String::new(),
        enabled: "true".to_string(),
    };

    for arg in attr_args {
        let Meta::NameValue(MetaNameValue { path, value, .. }) = arg else {
            return Err(syn::Error::new_spanned(arg, "expected `name = value`"));
        };
        let name = path.get_ident().map(|i| i.to_string()).unwrap_or_default();

        match name.as_str() {
            "id" => args.id = Some(string_value(value, "id")?),
            "cron" => args.cron = string_value(value, "cron")?,
            "retry" => args.retry = bool_or_string(value, "retry")?,
            "retry_timeout" => {
                args.retry_timeout = match value {
                    Expr::Lit(ExprLit { lit: Lit::Int(i), .. }) => i.base10_digits().to_string(),
                    Expr::Lit(ExprLit { lit: Lit::Str(s), .. }) => s.value(),
                    _ => {
                        return Err(syn::Error::new_spanned(
                            value,
                            "retry_timeout must be a string like \"30s\" or a number of milliseconds",
                        ))
                    }
                };
            }
            "enabled" => args.enabled = bool_or_string(value, "enabled")?,
            _ => {
                return Err(syn::Error::new_spanned(
                    path,
                    "unknown #[task] parameter; expected id, cron, retry, retry_timeout or enabled",
                ))
            }
        }
    }

    Ok(args)
}

fn string_value(value: &Expr, name: &str) -> syn::Result<String> {
    match value {
        Expr::Lit(ExprLit { lit: Lit::Str(s), .. }) => Ok(s.value()),
        _ => Err(syn::Error::new_spanned(value, format!("{name} must be a string"))),
    }
}

fn bool_or_string(value: &Expr, name: &str) -> syn::Result<String> {
    match value {
        Expr::Lit(ExprLit { lit: Lit::Bool(b), .. }) => Ok(b.value.to_string()),
        Expr::Lit(ExprLit { lit: Lit::Str(s), .. }) => Ok(s.value()),
        _ => Err(syn::Error::new_spanned(value, format!("{name} must be bool or string"))),
    }
}
