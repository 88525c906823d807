// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! CUDA printer.
//!
//! Renders the rate-coded PSP kernel set for a projection: kernel prototype,
//! kernel body and host-side launch. Connectivity is uploaded flattened
//! (`rank_pre` + per-row `nb_synapses`/`offsets`), one thread per
//! postsynaptic row. Uniform delays are applied on the host side by
//! redirecting the launch argument into the delayed-rate buffer; every other
//! delay form is rejected before this printer runs.

/// Renders the CUDA kernel set of one projection.
#[derive(Debug, Clone)]
pub struct CudaPrinter {
    pub real_ctype: &'static str,
}

impl CudaPrinter {
    pub fn new(real_ctype: &'static str) -> Self {
        Self { real_ctype }
    }

    fn kernel_name(&self, id_pre: usize, id_post: usize, target: &str) -> String {
        format!("cuPop{id_pre}_Pop{id_post}_{target}_psp")
    }

    /// Kernel prototype for the translation-unit header.
    pub fn psp_kernel_header(&self, id_pre: usize, id_post: usize, target: &str) -> String {
        let t = self.real_ctype;
        format!(
            "__global__ void {}( int post_size, int* rank_pre, int* nb_synapses, int* offsets, {t}* pre_r, {t}* w, {t}* sum_{target} );\n",
            self.kernel_name(id_pre, id_post, target)
        )
    }

    /// Kernel body: one thread per postsynaptic row, accumulation over the
    /// flattened synapse range of that row.
    pub fn psp_kernel_body(&self, id_pre: usize, id_post: usize, target: &str) -> String {
        let t = self.real_ctype;
        format!(
            r#"// Computes the psp for proj: pop{id_pre} -> pop{id_post} with target {target}
__global__ void {name}( int post_size, int* rank_pre, int* nb_synapses, int* offsets, {t}* pre_r, {t}* w, {t}* sum_{target} )
{{
    int i = threadIdx.x + blockIdx.x * blockDim.x;
    if (i < post_size) {{
        {t} sum = 0.0;
        int begin = offsets[i];
        int end = begin + nb_synapses[i];
        for (int j = begin; j < end; j++) {{
            sum += w[j] * pre_r[rank_pre[j]];
        }}
        sum_{target}[i] += sum;
    }}
}}
"#,
            name = self.kernel_name(id_pre, id_post, target),
        )
    }

    /// Host-side launch. `uniform_delay` redirects the rate argument into
    /// the device-resident delayed-rate buffer.
    pub fn psp_kernel_call(
        &self,
        id_proj: usize,
        id_pre: usize,
        id_post: usize,
        target: &str,
        uniform_delay: Option<usize>,
    ) -> String {
        let rate_arg = match uniform_delay {
            Some(d) => format!("pop{id_pre}.gpu_delayed_r[{}]", d.saturating_sub(1)),
            None => format!("pop{id_pre}.gpu_r"),
        };
        format!(
            r#"    // proj{id_proj}: pop{id_pre} -> pop{id_post} with target {target}
    if (pop{id_post}._active) {{
        int nb_blocks = ceil(double(pop{id_post}.size) / double(__threads_per_block__));
        {name}<<< nb_blocks, __threads_per_block__, 0, proj{id_proj}.stream >>>(
            pop{id_post}.size,
            proj{id_proj}.gpu_pre_rank,
            proj{id_proj}.gpu_nb_synapses,
            proj{id_proj}.gpu_off_synapses,
            {rate_arg},
            proj{id_proj}.gpu_w,
            pop{id_post}.gpu__sum_{target}
        );
    }}
"#,
            name = self.kernel_name(id_pre, id_post, target),
        )
    }
}
