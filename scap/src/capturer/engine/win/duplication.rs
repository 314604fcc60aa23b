use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use common::ChannelWriter;
use log::{debug, error, warn};
use windows::core::Interface;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_UNKNOWN;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, IDXGIFactory1, IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource,
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO,
};

use super::ensure_dpi_aware;
use crate::capturer::{CaptureError, VideoCapturer, Worker};
use crate::frame::{copy_rows, scale_nearest};
use crate::{Size, FRAME_RATE};

const ACQUIRE_TIMEOUT_MS: u32 = 20;

/// Primary output duplication on the first adapter.
struct Duplication {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
}

impl Duplication {
    fn open() -> Result<Self, CaptureError> {
        ensure_dpi_aware();

        unsafe {
            let factory: IDXGIFactory1 = CreateDXGIFactory1()
                .map_err(|err| CaptureError::init("DXGI factory", err))?;
            let adapter = factory
                .EnumAdapters1(0)
                .map_err(|err| CaptureError::init("DXGI adapter", err))?;
            let output = adapter
                .EnumOutputs(0)
                .map_err(|err| CaptureError::init("DXGI output", err))?;
            let output: IDXGIOutput1 = output
                .cast()
                .map_err(|err| CaptureError::init("IDXGIOutput1", err))?;

            let mut device = None;
            let mut context = None;
            D3D11CreateDevice(
                &adapter,
                D3D_DRIVER_TYPE_UNKNOWN,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(|err| CaptureError::init("D3D11 device", err))?;
            let (Some(device), Some(context)) = (device, context) else {
                return Err(CaptureError::init("D3D11 device", "no device returned"));
            };

            let duplication = output
                .DuplicateOutput(&device)
                .map_err(|err| CaptureError::init("desktop duplication", err))?;

            Ok(Self {
                device,
                context,
                duplication,
            })
        }
    }
}

/// CPU readable copy of the desktop texture.
struct Staging {
    texture: ID3D11Texture2D,
    size: Size,
}

impl Staging {
    fn create(device: &ID3D11Device, source: &ID3D11Texture2D) -> windows::core::Result<Self> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { source.GetDesc(&mut desc) };

        let desc = D3D11_TEXTURE2D_DESC {
            Width: desc.Width,
            Height: desc.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: desc.Format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };

        let mut texture = None;
        unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture))? };
        let texture = texture.ok_or_else(|| windows::core::Error::from(DXGI_ERROR_ACCESS_LOST))?;

        Ok(Self {
            texture,
            size: Size::new(desc.Width, desc.Height),
        })
    }
}

enum Acquired {
    Frame,
    Timeout,
    Lost,
}

struct FrameReader {
    dup: Duplication,
    staging: Option<Staging>,
    packed: Vec<u8>,
}

impl FrameReader {
    /// Copy the next desktop image into `frame`, scaled to `size`.
    fn acquire(&mut self, size: Size, frame: &mut [u8]) -> Result<Acquired, CaptureError> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;

        let acquired = unsafe {
            self.dup
                .duplication
                .AcquireNextFrame(ACQUIRE_TIMEOUT_MS, &mut info, &mut resource)
        };
        match acquired {
            Ok(()) => {}
            Err(err) if err.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(Acquired::Timeout),
            Err(err) if err.code() == DXGI_ERROR_ACCESS_LOST => return Ok(Acquired::Lost),
            Err(err) => return Err(CaptureError::init("AcquireNextFrame", err)),
        }

        let copied = self.copy_out(resource, size, frame);
        if let Err(err) = unsafe { self.dup.duplication.ReleaseFrame() } {
            debug!("ReleaseFrame failed: {err}");
        }
        copied.map(|_| Acquired::Frame)
    }

    fn copy_out(
        &mut self,
        resource: Option<IDXGIResource>,
        size: Size,
        frame: &mut [u8],
    ) -> Result<(), CaptureError> {
        let Some(resource) = resource else {
            return Err(CaptureError::init("AcquireNextFrame", "no desktop resource"));
        };
        let texture: ID3D11Texture2D = resource
            .cast()
            .map_err(|err| CaptureError::init("desktop texture", err))?;

        if self.staging.is_none() {
            let staging = Staging::create(&self.dup.device, &texture)
                .map_err(|err| CaptureError::init("staging texture", err))?;
            debug!("Desktop duplication surface is {}", staging.size);
            self.staging = Some(staging);
        }
        let Some(staging) = self.staging.as_ref() else {
            return Err(CaptureError::init("staging texture", "missing"));
        };

        let context = &self.dup.context;
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            context.CopyResource(&staging.texture, &texture);
            context
                .Map(&staging.texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(|err| CaptureError::init("staging map", err))?;
        }

        let native = staging.size;
        let pitch = mapped.RowPitch as usize;
        let src = unsafe {
            std::slice::from_raw_parts(mapped.pData as *const u8, pitch * native.height as usize)
        };

        if native == size {
            let row_len = size.width as usize * 4;
            copy_rows(src, pitch, row_len, size.height as usize, &mut self.packed);
            let len = frame.len().min(self.packed.len());
            frame[..len].copy_from_slice(&self.packed[..len]);
        } else {
            scale_nearest(src, native, pitch, size, frame);
        }

        unsafe { context.Unmap(&staging.texture, 0) };

        Ok(())
    }
}

fn duplication_loop(size: Size, running: &AtomicBool, mut output: ChannelWriter) {
    let dup = match Duplication::open() {
        Ok(dup) => dup,
        Err(err) => {
            error!("Failed to open desktop duplication: {err}");
            return;
        }
    };
    let mut reader = FrameReader {
        dup,
        staging: None,
        packed: Vec::with_capacity(size.frame_len()),
    };

    let interval = Duration::from_secs(1) / FRAME_RATE;
    let mut frame = vec![0u8; size.frame_len()];
    let mut have_frame = false;
    let mut last_sent: Option<Instant> = None;

    while running.load(Ordering::Acquire) {
        let due = last_sent.is_none_or(|t| t.elapsed() >= interval);

        match reader.acquire(size, &mut frame) {
            Ok(Acquired::Frame) => have_frame = true,
            // Nothing changed on screen, repeat the last frame to hold the rate
            Ok(Acquired::Timeout) if !(have_frame && due) => continue,
            Ok(Acquired::Timeout) => {}
            Ok(Acquired::Lost) => {
                warn!("Desktop duplication access lost");
                break;
            }
            Err(err) => {
                error!("Desktop duplication failed: {err}");
                break;
            }
        }

        if !due {
            continue;
        }

        if let Err(err) = output.write_all(&frame) {
            debug!("Video channel closed: {err}");
            break;
        }
        last_sent = Some(Instant::now());
    }
}

/// DXGI desktop duplication capturer.
pub(crate) struct DuplicationCapturer {
    worker: Option<Worker>,
}

impl DuplicationCapturer {
    /// Duplication objects are bound to the thread that uses them, so this only checks that a
    /// duplication can be opened and the capture thread opens its own.
    pub fn new() -> Result<Self, CaptureError> {
        drop(Duplication::open()?);
        Ok(Self { worker: None })
    }
}

impl VideoCapturer for DuplicationCapturer {
    fn name(&self) -> &'static str {
        "dxgi-duplication"
    }

    fn start(&mut self, size: Size, output: ChannelWriter) -> Result<(), CaptureError> {
        self.stop();
        self.worker = Some(Worker::spawn(self.name(), output, move |running, output| {
            duplication_loop(size, running, output)
        })?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}
