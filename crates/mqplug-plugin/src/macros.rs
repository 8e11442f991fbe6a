//! Convenience macros for plugin development.

/// Exports a plugin's factory so the host can load the artifact.
///
/// Takes a path to a zero-argument constructor. Invoke it once, at the
/// root of a `cdylib` crate. `MQPLUG_BUILD_TIME`, when set for the build,
/// is recorded in the declaration.
///
/// # Example
/// ```rust,ignore
/// mqplug_plugin::export_plugin!(AuthPlugin::new);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($constructor:path) => {
        #[doc(hidden)]
        fn __mqplug_create_plugin() -> ::std::boxed::Box<dyn $crate::Plugin> {
            ::std::boxed::Box::new($constructor())
        }

        #[doc(hidden)]
        #[allow(non_upper_case_globals)]
        #[unsafe(no_mangle)]
        pub static mqplug_plugin_declaration: $crate::ffi::abi::PluginDeclaration =
            $crate::ffi::abi::PluginDeclaration::new(__mqplug_create_plugin)
                .with_build_time(::core::option_env!("MQPLUG_BUILD_TIME"));
    };
}
