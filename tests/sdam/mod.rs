mod rs;
