// Engine modules: renderer backend, image resources, configuration

pub mod assets;
pub mod config;
pub mod renderer;

#[cfg(test)]
pub(crate) mod test_support;
