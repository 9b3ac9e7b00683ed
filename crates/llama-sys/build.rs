use std::env;
use std::path::{Path, PathBuf};

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let source_dir = env::var("LLAMA_CPP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| manifest_dir.join("../../vendor/llama.cpp"));
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    println!("cargo:rerun-if-env-changed=LLAMA_CPP_DIR");
    println!("cargo:rerun-if-env-changed=LLAMA_PREBUILT_DIR");
    println!("cargo:rerun-if-changed=wrapper.h");

    // ── Locate libraries ──────────────────────────────────────────────
    //
    // `LLAMA_PREBUILT_DIR` points at an install tree (`lib/` + `include/`)
    // from an earlier build stage; otherwise llama.cpp is compiled from
    // `LLAMA_CPP_DIR` with CMake.
    let (lib_dir, include_dir) = match env::var("LLAMA_PREBUILT_DIR") {
        Ok(prebuilt) => prebuilt_tree(Path::new(&prebuilt)),
        Err(_) => cmake_build(&source_dir, &target_os),
    };

    link_libraries(&lib_dir, &target_os);
    generate_bindings(&include_dir, &source_dir);
}

fn lib_subdir(root: &Path) -> PathBuf {
    if root.join("lib64").exists() {
        root.join("lib64")
    } else {
        root.join("lib")
    }
}

fn prebuilt_tree(root: &Path) -> (PathBuf, PathBuf) {
    assert!(
        root.exists(),
        "LLAMA_PREBUILT_DIR={} does not exist",
        root.display()
    );
    println!(
        "cargo:warning=Linking prebuilt llama.cpp from {}",
        root.display()
    );
    (lib_subdir(root), root.join("include"))
}

fn cmake_build(source_dir: &Path, target_os: &str) -> (PathBuf, PathBuf) {
    assert!(
        source_dir.join("CMakeLists.txt").exists(),
        "llama.cpp source not found at {}. \
         Set LLAMA_CPP_DIR or run `git submodule update --init --recursive`.",
        source_dir.display()
    );

    let mut cfg = cmake::Config::new(source_dir);
    cfg.define("BUILD_SHARED_LIBS", "OFF")
        .define("LLAMA_BUILD_SERVER", "OFF")
        .define("LLAMA_BUILD_TESTS", "OFF")
        .define("LLAMA_BUILD_EXAMPLES", "OFF")
        .define("LLAMA_BUILD_TOOLS", "OFF")
        .define("LLAMA_BUILD_COMMON", "OFF")
        .define("LLAMA_CURL", "OFF");

    if env::var("CARGO_FEATURE_CUDA").is_ok() {
        cfg.define("GGML_CUDA", "ON");
    }
    if env::var("CARGO_FEATURE_VULKAN").is_ok() {
        cfg.define("GGML_VULKAN", "ON");
    }
    if env::var("CARGO_FEATURE_ROCM").is_ok() {
        let rocm = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".into());
        cfg.define("GGML_HIP", "ON")
            .define("CMAKE_HIP_COMPILER_ROCM_ROOT", &rocm)
            .define("CMAKE_HIP_FLAGS", format!("--rocm-path={rocm}"));
        if let Ok(targets) = env::var("AMDGPU_TARGETS") {
            cfg.define("AMDGPU_TARGETS", &targets);
        }
    }
    if target_os == "macos" {
        cfg.define("GGML_METAL", "ON");
    }

    let dst = cfg.build();
    (lib_subdir(&dst), dst.join("include"))
}

fn link_libraries(lib_dir: &Path, target_os: &str) {
    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=static=llama");

    // The ggml split differs between llama.cpp releases; link what exists.
    for name in ["ggml", "ggml-base", "ggml-cpu"] {
        if lib_dir.join(format!("lib{name}.a")).exists() {
            println!("cargo:rustc-link-lib=static={name}");
        }
    }

    if env::var("CARGO_FEATURE_CUDA").is_ok() && lib_dir.join("libggml-cuda.a").exists() {
        println!("cargo:rustc-link-lib=static=ggml-cuda");
        for lib in ["cuda", "cublas", "culibos", "cudart"] {
            println!("cargo:rustc-link-lib={lib}");
        }
    }
    if env::var("CARGO_FEATURE_VULKAN").is_ok() && lib_dir.join("libggml-vulkan.a").exists() {
        println!("cargo:rustc-link-lib=static=ggml-vulkan");
        println!("cargo:rustc-link-lib=vulkan");
    }
    if env::var("CARGO_FEATURE_ROCM").is_ok() && lib_dir.join("libggml-hip.a").exists() {
        println!("cargo:rustc-link-lib=static=ggml-hip");
        let rocm = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".into());
        println!("cargo:rustc-link-search=native={rocm}/lib");
        for lib in ["amdhip64", "hipblas", "rocblas", "hsa-runtime64"] {
            println!("cargo:rustc-link-lib={lib}");
        }
    }

    match target_os {
        "linux" => {
            println!("cargo:rustc-link-lib=stdc++");
            println!("cargo:rustc-link-lib=m");
            println!("cargo:rustc-link-lib=pthread");
            println!("cargo:rustc-link-lib=gomp");
        }
        "macos" => {
            if lib_dir.join("libggml-metal.a").exists() {
                println!("cargo:rustc-link-lib=static=ggml-metal");
            }
            if lib_dir.join("libggml-blas.a").exists() {
                println!("cargo:rustc-link-lib=static=ggml-blas");
            }
            for fw in ["Accelerate", "Metal", "MetalKit", "Foundation"] {
                println!("cargo:rustc-link-lib=framework={fw}");
            }
            println!("cargo:rustc-link-lib=c++");
        }
        "windows" => {
            println!("cargo:rustc-link-lib=msvcrt");
        }
        _ => {}
    }
}

fn generate_bindings(include_dir: &Path, source_dir: &Path) {
    let mut builder = bindgen::Builder::default()
        .header("wrapper.h")
        .clang_arg(format!("-I{}", include_dir.display()));

    // Source checkouts keep ggml headers in their own tree.
    for extra in [source_dir.join("include"), source_dir.join("ggml/include")] {
        if extra.exists() {
            builder = builder.clang_arg(format!("-I{}", extra.display()));
        }
    }

    let bindings = builder
        .allowlist_function("llama_.*")
        .allowlist_type("llama_.*")
        .allowlist_type("ggml_log_level")
        .allowlist_var("LLAMA_.*")
        .derive_default(true)
        .size_t_is_usize(true)
        .generate()
        .expect("Failed to generate llama.cpp bindings");

    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    bindings
        .write_to_file(out.join("bindings.rs"))
        .expect("Failed to write bindings");
}
