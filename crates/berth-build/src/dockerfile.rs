use berth_core::{ImageConfig, Ownership};

/// Generates the runtime Dockerfile that wraps a prebuilt artifact.
///
/// The binary is compiled outside the image (see [`crate::builder`]), so the
/// image is a single stage: runtime base, optional packages, the binary,
/// and an unprivileged user matching the volume owner.
pub struct DockerfileGenerator<'a> {
    config: &'a ImageConfig,
    binary: &'a str,
    user: Option<Ownership>,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(config: &'a ImageConfig, binary: &'a str) -> Self {
        Self {
            config,
            binary,
            user: None,
        }
    }

    /// Run the workload as `owner` instead of the base image's default user.
    pub fn user(mut self, owner: Ownership) -> Self {
        self.user = Some(owner);
        self
    }

    pub fn render(&self) -> String {
        let extra_packages = if self.config.extra_packages.is_empty() {
            String::new()
        } else {
            format!(
                "RUN apt-get update && apt-get install -y --no-install-recommends {} && rm -rf /var/lib/apt/lists/*\n",
                self.config.extra_packages.join(" ")
            )
        };

        let user = match self.user {
            Some(owner) => format!("USER {}:{}\n", owner.uid, owner.gid),
            None => String::new(),
        };

        format!(
            r#"# Generated by berth
FROM {runtime}
{extra_packages}COPY {binary} /usr/local/bin/{binary}
{user}ENTRYPOINT ["/usr/local/bin/{binary}"]
"#,
            runtime = self.config.runtime_image,
            binary = self.binary,
            extra_packages = extra_packages,
            user = user,
        )
    }
}
