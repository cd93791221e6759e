//! Docker API backend for [`ContainerEngine`].

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{
    BuildImageOptions, CommitContainerOptions, CreateImageOptions, RemoveImageOptions,
    TagImageOptions,
};
use bollard::models::HostConfig;
use bollard::volume::CreateVolumeOptions;
use futures::{StreamExt, TryStreamExt};
use marina_shared::constants::STOP_TIMEOUT_SECS;
use marina_shared::errors::{MarinaError, MarinaResult};

use super::{
    ContainerEngine, ContainerId, ContainerSpec, ImageConfig, LogChunk, LogStream, MountSource,
};

/// [`ContainerEngine`] backed by a Docker daemon.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the local defaults (`DOCKER_HOST`, else the local socket).
    pub fn connect() -> MarinaResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| MarinaError::Engine(format!("failed to connect to docker: {}", e)))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn engine_err(context: &str, err: DockerError) -> MarinaError {
    MarinaError::Engine(format!("{}: {}", context, err))
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn to_config(spec: &ContainerSpec) -> Config<String> {
    let binds: Vec<String> = spec
        .mounts
        .iter()
        .map(|m| {
            let source = match &m.source {
                MountSource::Volume(name) => name.clone(),
                MountSource::HostPath(path) => path.display().to_string(),
            };
            let mode = if m.read_only { ":ro" } else { "" };
            format!("{}:{}{}", source, m.target, mode)
        })
        .collect();
    let volumes_from: Vec<String> = spec
        .volumes_from
        .iter()
        .map(|id| id.as_str().to_string())
        .collect();
    let volumes: HashMap<String, HashMap<(), ()>> = spec
        .volumes
        .iter()
        .map(|v| (v.clone(), HashMap::new()))
        .collect();
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.cmd.clone()),
        entrypoint: spec.entrypoint.clone(),
        env: Some(env),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        volumes: (!volumes.is_empty()).then_some(volumes),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            volumes_from: (!volumes_from.is_empty()).then_some(volumes_from),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Split `repo[:tag]` into repository and tag, defaulting the tag to `latest`.
///
/// Digest references (`repo@sha256:...`) are returned whole with an empty tag.
pub(crate) fn split_reference(reference: &str) -> (&str, &str) {
    if reference.contains('@') {
        return (reference, "");
    }
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(pos) => {
            let split = name_start + pos;
            (&reference[..split], &reference[split + 1..])
        }
        None => (reference, "latest"),
    }
}

/// Tar archive holding a single `Dockerfile`.
fn descriptor_context(descriptor: &str) -> MarinaResult<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(descriptor.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, "Dockerfile", descriptor.as_bytes())
        .map_err(|e| MarinaError::Internal(format!("failed to pack build context: {}", e)))?;
    builder
        .into_inner()
        .map_err(|e| MarinaError::Internal(format!("failed to pack build context: {}", e)))
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create_container(&self, spec: &ContainerSpec) -> MarinaResult<ContainerId> {
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, to_config(spec))
            .await
            .map_err(|e| engine_err("failed to create container", e))?;
        for warning in &response.warnings {
            tracing::warn!(image = %spec.image, "engine warning: {}", warning);
        }
        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> MarinaResult<()> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_err("failed to start container", e))
    }

    async fn wait_container(&self, id: &ContainerId) -> MarinaResult<i64> {
        let mut stream = self.docker.wait_container(
            id.as_str(),
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(engine_err("failed to wait for container", e)),
            None => Err(MarinaError::Engine(format!(
                "wait stream for container {} ended without a status",
                id
            ))),
        }
    }

    async fn stop_container(&self, id: &ContainerId) -> MarinaResult<()> {
        let result = self
            .docker
            .stop_container(
                id.as_str(),
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(engine_err("failed to stop container", e)),
        }
    }

    async fn remove_container(&self, id: &ContainerId) -> MarinaResult<()> {
        self.docker
            .remove_container(
                id.as_str(),
                Some(RemoveContainerOptions {
                    v: true,
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| engine_err("failed to remove container", e))
    }

    async fn attach_container(&self, id: &ContainerId) -> MarinaResult<LogStream> {
        let results = self
            .docker
            .attach_container(
                id.as_str(),
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| engine_err("failed to attach to container", e))?;

        let stream = results
            .output
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(LogChunk::Stdout(message.to_vec())))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        Some(Ok(LogChunk::Stderr(message.to_vec())))
                    }
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(engine_err("container output stream failed", e))),
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn volume_exists(&self, name: &str) -> MarinaResult<bool> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(engine_err("failed to inspect volume", e)),
        }
    }

    async fn create_volume(&self, name: &str) -> MarinaResult<()> {
        self.docker
            .create_volume(CreateVolumeOptions::<String> {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| engine_err("failed to create volume", e))
    }

    async fn inspect_image(&self, reference: &str) -> MarinaResult<Option<ImageConfig>> {
        let inspect = match self.docker.inspect_image(reference).await {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(engine_err("failed to inspect image", e)),
        };

        let mut config = ImageConfig {
            author: inspect.author.filter(|a| !a.is_empty()),
            ..Default::default()
        };
        if let Some(c) = inspect.config {
            config.cmd = c.cmd;
            config.entrypoint = c.entrypoint;
            config.env = c.env.unwrap_or_default();
            config.working_dir = c.working_dir.filter(|w| !w.is_empty());
            config.user = c.user.filter(|u| !u.is_empty());

            // the API hands these out as maps, sort for a stable descriptor
            let mut ports: Vec<String> = c.exposed_ports.unwrap_or_default().into_keys().collect();
            ports.sort();
            let mut volumes: Vec<String> = c.volumes.unwrap_or_default().into_keys().collect();
            volumes.sort();
            config.exposed_ports = ports;
            config.volumes = volumes;
        }
        Ok(Some(config))
    }

    async fn pull_image(&self, reference: &str) -> MarinaResult<()> {
        let (from_image, tag) = split_reference(reference);
        let mut progress = self.docker.create_image(
            Some(CreateImageOptions::<String> {
                from_image: from_image.to_string(),
                tag: tag.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(info) = progress
            .try_next()
            .await
            .map_err(|e| engine_err("failed to pull image", e))?
        {
            if let Some(status) = info.status {
                tracing::debug!(image = %reference, "{}", status);
            }
        }
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> MarinaResult<()> {
        self.docker
            .remove_image(reference, Some(RemoveImageOptions::default()), None)
            .await
            .map(|_| ())
            .map_err(|e| engine_err("failed to remove image", e))
    }

    async fn commit_container(
        &self,
        id: &ContainerId,
        repository: &str,
        tag: &str,
    ) -> MarinaResult<()> {
        self.docker
            .commit_container(
                CommitContainerOptions::<String> {
                    container: id.as_str().to_string(),
                    repo: repository.to_string(),
                    tag: tag.to_string(),
                    pause: true,
                    ..Default::default()
                },
                Config::<String>::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| engine_err("failed to commit container", e))
    }

    async fn build_image(&self, descriptor: &str, reference: &str) -> MarinaResult<()> {
        let context = descriptor_context(descriptor)?;
        let mut progress = self.docker.build_image(
            BuildImageOptions::<String> {
                dockerfile: "Dockerfile".to_string(),
                t: reference.to_string(),
                rm: true,
                forcerm: true,
                ..Default::default()
            },
            None,
            Some(context.into()),
        );

        while let Some(info) = progress
            .try_next()
            .await
            .map_err(|e| engine_err("failed to build image", e))?
        {
            if let Some(error) = info.error {
                return Err(MarinaError::Engine(format!(
                    "image build failed for {}: {}",
                    reference, error
                )));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(image = %reference, "{}", line);
                }
            }
        }
        Ok(())
    }

    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> MarinaResult<()> {
        self.docker
            .tag_image(
                image,
                Some(TagImageOptions::<String> {
                    repo: repository.to_string(),
                    tag: tag.to_string(),
                }),
            )
            .await
            .map_err(|e| engine_err("failed to tag image", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Mount;

    #[test]
    fn test_split_reference() {
        assert_eq!(split_reference("busybox"), ("busybox", "latest"));
        assert_eq!(split_reference("busybox:1.36"), ("busybox", "1.36"));
        assert_eq!(
            split_reference("registry:5000/team/app"),
            ("registry:5000/team/app", "latest")
        );
        assert_eq!(
            split_reference("registry:5000/team/app:v2"),
            ("registry:5000/team/app", "v2")
        );
        assert_eq!(split_reference("app@sha256:abc"), ("app@sha256:abc", ""));
    }

    #[test]
    fn test_config_binds_and_volumes() {
        let spec = ContainerSpec::new("img", ["sh", "build.sh"])
            .with_mount(Mount::bind("/tmp/work", "/builder/src", true))
            .with_mount(Mount::volume("app__buildcache", "/tmp/cache"))
            .with_volume("/builder/dist")
            .with_volumes_from(ContainerId::new("abc"));
        let config = to_config(&spec);
        let host = config.host_config.unwrap();

        assert_eq!(
            host.binds.unwrap(),
            ["/tmp/work:/builder/src:ro", "app__buildcache:/tmp/cache"]
        );
        assert_eq!(host.volumes_from.unwrap(), ["abc"]);
        assert!(config.volumes.unwrap().contains_key("/builder/dist"));
        assert_eq!(config.entrypoint, None);
    }

    #[test]
    fn test_descriptor_context_contains_dockerfile() {
        let bytes = descriptor_context("FROM scratch\n").unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, ["Dockerfile"]);
    }
}
