//! Plugin units compiled into every build.

mod seen;

use crate::loader::PluginUnit;

pub fn builtin_units() -> Vec<PluginUnit> {
    vec![PluginUnit {
        name: "filter_seen",
        load: seen::load,
    }]
}
