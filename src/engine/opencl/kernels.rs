// src/engine/opencl/kernels.rs
//! OpenCL program generation
//!
//! The kernel bodies live in `ethash.cl`. Because the partition buffers are
//! separate kernel parameters, the program is specialised for the partition
//! count by a generated preamble.

/// Kernel bodies shared by every partition count
pub const ETHASH_CL: &str = include_str!("ethash.cl");

/// DAG construction kernel
pub const DAG_KERNEL: &str = "ethash_dag";
/// Hashimoto kernel
pub const HASH_KERNEL: &str = "ethash_hash";
/// Difficulty filter kernel
pub const FILTER_KERNEL: &str = "ethash_filter";

/// Full program source for `partitions` DAG buffers
pub fn program_source(partitions: usize) -> String {
    let partitions = partitions.max(1);
    let params: Vec<String> = (0..partitions)
        .map(|i| format!("__global uint* dag{}", i))
        .collect();
    let args: Vec<String> = (0..partitions).map(|i| format!("dag{}", i)).collect();

    let mut select = String::from("__global uint* select_partition(uint p, DAG_PARAMS)\n{\n    switch (p) {\n");
    for i in 0..partitions - 1 {
        select.push_str(&format!("    case {}: return dag{};\n", i, i));
    }
    select.push_str(&format!(
        "    default: return dag{};\n    }}\n}}\n",
        partitions - 1
    ));

    format!(
        "#define DAG_PARAMS {}\n#define DAG_ARGS {}\n\n{}\n{}",
        params.join(", "),
        args.join(", "),
        select,
        ETHASH_CL
    )
}
