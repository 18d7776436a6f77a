// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{future, io, sync::Arc};

use crate::{
    frame::{Exception, Response, SlaveRequest},
    image::ProcessImage,
};

/// A Modbus server service.
pub trait Service {
    /// Requests handled by the service.
    type Request;

    /// Responses given by the service.
    type Response;

    /// Protocol exceptions raised by the service.
    type Exception;

    /// The future response value.
    type Future: future::Future<Output = Result<Self::Response, Self::Exception>> + Send;

    /// Process the request and return the response asynchronously.
    fn call(&self, req: Self::Request) -> Self::Future;
}

/// Creates new `Service` values.
pub trait NewService {
    /// Requests handled by the service
    type Request;

    /// Responses given by the service
    type Response;

    /// Protocol exceptions raised by the service
    type Exception;

    /// The `Service` value created by this factory
    type Instance: Service<
        Request = Self::Request,
        Response = Self::Response,
        Exception = Self::Exception,
    >;

    /// Create and return a new service value.
    fn new_service(&self) -> io::Result<Self::Instance>;
}

impl<F, R> NewService for F
where
    F: Fn() -> io::Result<R>,
    R: Service,
{
    type Request = R::Request;
    type Response = R::Response;
    type Exception = R::Exception;
    type Instance = R;

    fn new_service(&self) -> io::Result<R> {
        (*self)()
    }
}

impl<S: NewService + ?Sized> NewService for Arc<S> {
    type Request = S::Request;
    type Response = S::Response;
    type Exception = S::Exception;
    type Instance = S::Instance;

    fn new_service(&self) -> io::Result<S::Instance> {
        (**self).new_service()
    }
}

impl<S: Service + ?Sized + 'static> Service for Box<S> {
    type Request = S::Request;
    type Response = S::Response;
    type Exception = S::Exception;
    type Future = S::Future;

    fn call(&self, request: S::Request) -> Self::Future {
        (**self).call(request)
    }
}

impl<S: Service + ?Sized + 'static> Service for Arc<S> {
    type Request = S::Request;
    type Response = S::Response;
    type Exception = S::Exception;
    type Future = S::Future;

    fn call(&self, request: S::Request) -> Self::Future {
        (**self).call(request)
    }
}

/// A [`Service`] that dispatches requests against a shared
/// [`ProcessImage`].
///
/// This is the canonical server handler: every transport listener can be
/// served from the same image.
#[derive(Debug, Clone)]
pub struct ImageService {
    image: Arc<ProcessImage>,
}

impl ImageService {
    #[must_use]
    pub fn new(image: Arc<ProcessImage>) -> Self {
        Self { image }
    }

    /// The shared process image.
    #[must_use]
    pub fn image(&self) -> &Arc<ProcessImage> {
        &self.image
    }
}

impl Service for ImageService {
    type Request = SlaveRequest;
    type Response = Response;
    type Exception = Exception;
    type Future = future::Ready<Result<Response, Exception>>;

    fn call(&self, req: SlaveRequest) -> Self::Future {
        future::ready(self.image.handle(req.unit, req.request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::Request,
        image::{UnitImage, UnitLayout},
    };

    #[tokio::test]
    async fn image_service_dispatch() {
        let mut image = ProcessImage::new();
        let mut unit = UnitImage::new(UnitLayout::uniform(8));
        unit.set_input_register(2, 0x77).unwrap();
        image.insert_unit(1, unit);
        let service = ImageService::new(Arc::new(image));

        let rsp = service
            .call(SlaveRequest {
                unit: 1,
                request: Request::ReadInputRegisters(0, 4),
            })
            .await
            .unwrap();
        assert_eq!(rsp, Response::ReadInputRegisters(vec![0, 0, 0x77, 0]));

        let err = service
            .call(SlaveRequest {
                unit: 1,
                request: Request::ReadInputRegisters(5, 4),
            })
            .await
            .unwrap_err();
        assert_eq!(err, Exception::IllegalDataAddress);
    }
}
