//! Bootstrap stub generation.

use crate::config::BuildConfig;
use crate::version::BuildContext;

/// Marker that ends the executable part of every phar.
pub const HALT_COMPILER: &str = "__HALT_COMPILER();";

const CACHE_GUARD: &str = r#"if (extension_loaded('apc') && filter_var(ini_get('apc.enable_cli'), FILTER_VALIDATE_BOOLEAN) && filter_var(ini_get('apc.cache_by_default'), FILTER_VALIDATE_BOOLEAN)) {
    if (version_compare(phpversion('apc'), '3.0.12', '>=')) {
        ini_set('apc.cache_by_default', 0);
    } else {
        fwrite(STDERR, 'Warning: APC <= 3.0.12 may cause fatal errors when running commands from this archive.'.PHP_EOL);
        fwrite(STDERR, 'Update APC, or set apc.enable_cli or apc.cache_by_default to 0 in your php.ini.'.PHP_EOL);
    }
}
"#;

/// Render the stub that maps the archive and hands over to the entry script.
pub fn generate(config: &BuildConfig, ctx: &BuildContext) -> String {
    let mut stub = String::from("#!/usr/bin/env php\n<?php\n");

    stub.push_str("/*\n");
    for line in &config.stub.banner {
        if line.is_empty() {
            stub.push_str(" *\n");
        } else {
            stub.push_str(" * ");
            stub.push_str(line);
            stub.push('\n');
        }
    }
    stub.push_str(" */\n\n");

    stub.push_str(CACHE_GUARD);
    stub.push('\n');
    stub.push_str(&format!("Phar::mapPhar('{}');\n", php_single_quote(&config.alias)));

    // Dev builds warn once they are older than the configured window.
    if ctx.is_dev_build() {
        stub.push_str(&format!(
            "define('{}', {});\n",
            php_single_quote(&config.stub.dev_warning_constant),
            ctx.dev_warning_time(config.stub.dev_warning_days)
        ));
    }

    stub.push_str(&format!(
        "require 'phar://{}/{}';\n\n",
        php_single_quote(&config.alias),
        php_single_quote(&config.bin_entry())
    ));
    stub.push_str(HALT_COMPILER);
    stub
}

fn php_single_quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}
