use std::{env, fs, path::PathBuf};

const SHADERS: [(&str, shaderc::ShaderKind); 2] = [
    ("shader.vert", shaderc::ShaderKind::Vertex),
    ("shader.frag", shaderc::ShaderKind::Fragment),
];

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    let compiler = shaderc::Compiler::new().expect("Failed to create shader compiler");
    let mut options = shaderc::CompileOptions::new().expect("Failed to create compile options");
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (name, kind) in SHADERS {
        let path = PathBuf::from("shaders").join(name);
        println!("cargo:rerun-if-changed={}", path.display());

        let source = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
        let spirv = compiler
            .compile_into_spirv(&source, kind, name, "main", Some(&options))
            .unwrap_or_else(|e| panic!("Failed to compile {}: {}", name, e));

        fs::write(out.join(format!("{}.spv", name)), spirv.as_binary_u8())
            .unwrap_or_else(|e| panic!("Failed to write {}.spv: {}", name, e));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
