//! [`SurfaceGraphics`] implementation on top of wgpu.
//!
//! Textures and meshes are created immediately; patch draws are collected
//! and handed to the caller, who records them into its own render pass with
//! [`WgpuSurfaceGraphics::record`].

use std::collections::HashMap;

use terra_surface::{
    DecodedImage, GraphicsError, MeshHandle, PatchDraw, PatchMesh, SurfaceGraphics,
    TextureHandle,
};

use crate::buffer::PatchMeshBuffer;
use crate::gpu::GpuDevice;
use crate::texture::{TileTexture, TileTextureUploader};

/// wgpu-backed graphics context for the planet surface.
pub struct WgpuSurfaceGraphics {
    gpu: GpuDevice,
    uploader: TileTextureUploader,
    /// 1x1 white albedo and flat elevation bound for untextured draws.
    placeholder: (TileTexture, TileTexture),
    textures: HashMap<TextureHandle, TileTexture>,
    meshes: HashMap<MeshHandle, PatchMeshBuffer>,
    draws: Vec<PatchDraw>,
    next_handle: u32,
}

impl WgpuSurfaceGraphics {
    /// Wrap a device.
    pub fn new(gpu: GpuDevice) -> Result<Self, GraphicsError> {
        let uploader = TileTextureUploader::new(&gpu.device);
        let placeholder = (
            uploader.upload(
                &gpu.device,
                &gpu.queue,
                "placeholder-albedo",
                &DecodedImage::filled(1, 1, &[255, 255, 255, 255]),
            )?,
            uploader.upload(
                &gpu.device,
                &gpu.queue,
                "placeholder-elevation",
                &DecodedImage::filled(1, 1, &[0]),
            )?,
        );
        Ok(Self {
            gpu,
            uploader,
            placeholder,
            textures: HashMap::new(),
            meshes: HashMap::new(),
            draws: Vec::new(),
            next_handle: 0,
        })
    }

    /// The device the textures live on.
    pub fn device(&self) -> &wgpu::Device {
        &self.gpu.device
    }

    /// The queue used for uploads.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.gpu.queue
    }

    /// Layout of the per-texture bind groups.
    pub fn texture_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        self.uploader.bind_group_layout()
    }

    /// A live texture.
    pub fn texture(&self, handle: TextureHandle) -> Option<&TileTexture> {
        self.textures.get(&handle)
    }

    /// Number of live textures.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// An uploaded mesh.
    pub fn mesh(&self, handle: MeshHandle) -> Option<&PatchMeshBuffer> {
        self.meshes.get(&handle)
    }

    /// Draws collected since the last call.
    pub fn take_draws(&mut self) -> Vec<PatchDraw> {
        std::mem::take(&mut self.draws)
    }

    /// Record `draws` into `pass`.
    ///
    /// The pipeline must already be set. For each draw the uniform block is
    /// written to `uniforms` at the draw's dynamic offset, stepping by
    /// `uniform_stride`, and bound at group 0; albedo and elevation bind at
    /// groups 1 and 2. Draws without resident textures bind the placeholder.
    pub fn record(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        draws: &[PatchDraw],
        uniforms: &wgpu::Buffer,
        uniform_group: &wgpu::BindGroup,
        uniform_stride: u32,
    ) {
        for (i, draw) in draws.iter().enumerate() {
            let Some(mesh) = self.meshes.get(&draw.mesh) else {
                log::warn!("Skipping draw of {} with unknown mesh {:?}", draw.address, draw.mesh);
                continue;
            };
            let offset = i as u32 * uniform_stride;
            self.gpu.queue.write_buffer(
                uniforms,
                offset as wgpu::BufferAddress,
                bytemuck::bytes_of(&draw.uniforms),
            );
            pass.set_bind_group(0, uniform_group, &[offset]);

            let (albedo, elevation) = match draw.textures {
                Some(pair) => (
                    self.textures.get(&pair.albedo).unwrap_or(&self.placeholder.0),
                    self.textures
                        .get(&pair.elevation)
                        .unwrap_or(&self.placeholder.1),
                ),
                None => (&self.placeholder.0, &self.placeholder.1),
            };
            pass.set_bind_group(1, &albedo.bind_group, &[]);
            pass.set_bind_group(2, &elevation.bind_group, &[]);

            mesh.bind(pass);
            mesh.draw(pass);
        }
    }

    fn allocate(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl SurfaceGraphics for WgpuSurfaceGraphics {
    fn create_texture(
        &mut self,
        label: &str,
        image: &DecodedImage,
    ) -> Result<TextureHandle, GraphicsError> {
        let texture = self
            .uploader
            .upload(&self.gpu.device, &self.gpu.queue, label, image)?;
        let handle = TextureHandle(self.allocate());
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        match self.textures.remove(&texture) {
            Some(tile) => tile.texture.destroy(),
            None => log::warn!("Delete of unknown texture {texture:?}"),
        }
    }

    fn create_patch_mesh(
        &mut self,
        label: &str,
        mesh: &PatchMesh,
    ) -> Result<MeshHandle, GraphicsError> {
        let buffer = PatchMeshBuffer::new(&self.gpu.device, label, mesh);
        let handle = MeshHandle(self.allocate());
        self.meshes.insert(handle, buffer);
        Ok(handle)
    }

    fn draw_patch(&mut self, draw: &PatchDraw) {
        self.draws.push(*draw);
    }
}
